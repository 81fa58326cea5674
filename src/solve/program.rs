// src/solve/program.rs

//! Logic-program construction
//!
//! The facts compiler builds an [`AspProgram`]: ground facts plus named
//! rules, kept in emission order so the rendered text is bit-for-bit
//! reproducible. Every rule carries an id and its source text; the relaxed
//! rendering guards each rule with an assumable `__rule(N)` atom, which is
//! what lets the driver turn an infeasible solve into a report of the
//! rules that cannot hold together.

use crate::error::{Error, Result};
use std::fmt;

/// One term of an atom: quoted string or integer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AspArg {
    Str(String),
    Num(i64),
}

impl fmt::Display for AspArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AspArg::Str(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            AspArg::Num(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for AspArg {
    fn from(s: &str) -> Self {
        AspArg::Str(s.to_string())
    }
}

impl From<String> for AspArg {
    fn from(s: String) -> Self {
        AspArg::Str(s)
    }
}

impl From<i64> for AspArg {
    fn from(n: i64) -> Self {
        AspArg::Num(n)
    }
}

impl From<usize> for AspArg {
    fn from(n: usize) -> Self {
        AspArg::Num(n as i64)
    }
}

/// A ground atom: `name("a", 3)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AspFunction {
    pub name: String,
    pub args: Vec<AspArg>,
}

impl AspFunction {
    pub fn new(name: impl Into<String>, args: Vec<AspArg>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// String view of argument `i`, if it is a string.
    pub fn str_arg(&self, i: usize) -> Option<&str> {
        match self.args.get(i) {
            Some(AspArg::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn num_arg(&self, i: usize) -> Option<i64> {
        match self.args.get(i) {
            Some(AspArg::Num(n)) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for AspFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
            write!(f, "({})", args.join(","))?;
        }
        Ok(())
    }
}

/// Shorthand for building an atom.
pub fn fun(name: &str, args: Vec<AspArg>) -> AspFunction {
    AspFunction::new(name, args)
}

/// A rule with its id and human-readable source text.
#[derive(Debug, Clone)]
pub struct AspRule {
    pub id: usize,
    pub head: AspFunction,
    pub body: Vec<AspFunction>,
}

impl AspRule {
    /// The `head :- body.` source text shown in unsat-core diagnostics.
    pub fn source_text(&self) -> String {
        if self.body.is_empty() {
            format!("{}.", self.head)
        } else {
            let body: Vec<String> = self.body.iter().map(|a| a.to_string()).collect();
            format!("{} :- {}.", self.head, body.join(", "))
        }
    }
}

/// The generated part of a logic program: facts, rules, and raw ground
/// text blocks (for constructs like one-of-N choices the rule builder
/// does not model).
#[derive(Debug, Clone, Default)]
pub struct AspProgram {
    facts: Vec<AspFunction>,
    rules: Vec<AspRule>,
    raw: Vec<String>,
}

impl AspProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ground fact.
    pub fn fact(&mut self, head: AspFunction) {
        self.facts.push(head);
    }

    /// Register a rule and return its id.
    pub fn rule(&mut self, head: AspFunction, body: Vec<AspFunction>) -> usize {
        let id = self.rules.len();
        self.rules.push(AspRule { id, head, body });
        id
    }

    /// Emit exactly-one-of-N as raw ground text: richer than the rule
    /// builder models, so it is written directly.
    pub fn one_of(&mut self, head_template: &str, condition: &str) {
        self.raw
            .push(format!("1 {{ {} }} 1 :- {}.", head_template, condition));
    }

    /// Append a raw line verbatim.
    pub fn raw(&mut self, line: impl Into<String>) {
        self.raw.push(line.into());
    }

    pub fn facts(&self) -> &[AspFunction] {
        &self.facts
    }

    pub fn rules(&self) -> &[AspRule] {
        &self.rules
    }

    pub fn rule_text(&self, id: usize) -> Option<String> {
        self.rules.get(id).map(|r| r.source_text())
    }

    /// Render with rules as hard implications.
    pub fn strict_text(&self) -> String {
        let mut out = String::new();
        for fact in &self.facts {
            out.push_str(&format!("{}.\n", fact));
        }
        for rule in &self.rules {
            out.push_str(&rule.source_text());
            out.push('\n');
        }
        for line in &self.raw {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Render with every rule guarded by an assumable `__rule(N)` atom and
    /// an objective that keeps as many rules on as possible. The rules a
    /// best relaxed model turns off are the ones that cannot hold
    /// together.
    pub fn relaxed_text(&self) -> String {
        let mut out = String::new();
        for fact in &self.facts {
            out.push_str(&format!("{}.\n", fact));
        }
        for rule in &self.rules {
            let mut body: Vec<String> = vec![format!("__rule({})", rule.id)];
            body.extend(rule.body.iter().map(|a| a.to_string()));
            out.push_str(&format!("{} :- {}.\n", rule.head, body.join(", ")));
            out.push_str(&format!("{{ __rule({}) }}.\n", rule.id));
        }
        for line in &self.raw {
            out.push_str(line);
            out.push('\n');
        }
        // Keeping rules outranks every base optimization level; otherwise
        // the optimizer could drop extra rules just to improve weights
        out.push_str("#maximize { 1@10,N : __rule(N) }.\n");
        out.push_str("#show __rule/1.\n");
        out
    }
}

/// Parse a ground atom like `attr("node","zlib")` back into a function.
/// Used on solver output.
pub fn parse_atom(text: &str) -> Result<AspFunction> {
    let text = text.trim();
    let open = match text.find('(') {
        Some(i) => i,
        None => return Ok(AspFunction::new(text, Vec::new())),
    };
    if !text.ends_with(')') {
        return Err(Error::SolverBackend(format!("malformed atom '{}'", text)));
    }
    let name = &text[..open];
    let inner = &text[open + 1..text.len() - 1];

    let mut args = Vec::new();
    let mut chars = inner.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ',' | ' ' => {
                chars.next();
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut escaped = false;
                for c in chars.by_ref() {
                    if escaped {
                        s.push(c);
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        break;
                    } else {
                        s.push(c);
                    }
                }
                args.push(AspArg::Str(s));
            }
            _ => {
                let mut tok = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    tok.push(c);
                    chars.next();
                }
                let tok = tok.trim().to_string();
                match tok.parse::<i64>() {
                    Ok(n) => args.push(AspArg::Num(n)),
                    Err(_) => args.push(AspArg::Str(tok)),
                }
            }
        }
    }
    Ok(AspFunction::new(name, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_rendering() {
        let mut p = AspProgram::new();
        p.fact(fun("possible_version", vec!["zlib".into(), "1.3".into()]));
        p.fact(fun("version_weight", vec!["zlib".into(), "1.3".into(), 0usize.into()]));
        assert_eq!(
            p.strict_text(),
            "possible_version(\"zlib\",\"1.3\").\nversion_weight(\"zlib\",\"1.3\",0).\n"
        );
    }

    #[test]
    fn test_rule_source_text() {
        let mut p = AspProgram::new();
        let id = p.rule(
            fun("attr", vec!["node".into(), "zlib".into()]),
            vec![fun("root", vec!["zlib".into()])],
        );
        assert_eq!(
            p.rule_text(id).unwrap(),
            "attr(\"node\",\"zlib\") :- root(\"zlib\")."
        );
    }

    #[test]
    fn test_relaxed_text_guards_rules() {
        let mut p = AspProgram::new();
        p.rule(
            fun("a", vec![]),
            vec![fun("b", vec![])],
        );
        let relaxed = p.relaxed_text();
        assert!(relaxed.contains("a :- __rule(0), b."));
        assert!(relaxed.contains("{ __rule(0) }."));
        assert!(relaxed.contains("#maximize"));
    }

    #[test]
    fn test_one_of_raw_emission() {
        let mut p = AspProgram::new();
        p.one_of(
            "provider(\"mpi\",P) : possible_provider(\"mpi\",P)",
            "virtual_required(\"mpi\")",
        );
        assert!(p.strict_text().contains(
            "1 { provider(\"mpi\",P) : possible_provider(\"mpi\",P) } 1 :- virtual_required(\"mpi\")."
        ));
    }

    #[test]
    fn test_emission_order_is_stable() {
        let build = || {
            let mut p = AspProgram::new();
            p.fact(fun("b", vec![]));
            p.fact(fun("a", vec![]));
            p.rule(fun("c", vec![]), vec![fun("a", vec![])]);
            p.strict_text()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_parse_atom_roundtrip() {
        let atom = fun(
            "attr",
            vec!["variant_value".into(), "hdf5".into(), "mpi".into(), "true".into()],
        );
        let parsed = parse_atom(&atom.to_string()).unwrap();
        assert_eq!(parsed, atom);
    }

    #[test]
    fn test_parse_atom_numbers_and_escapes() {
        let parsed = parse_atom("external(\"openssl\",0)").unwrap();
        assert_eq!(parsed.str_arg(0), Some("openssl"));
        assert_eq!(parsed.num_arg(1), Some(0));

        let parsed = parse_atom("note(\"say \\\"hi\\\"\")").unwrap();
        assert_eq!(parsed.str_arg(0), Some("say \"hi\""));
    }

    #[test]
    fn test_parse_atom_without_args() {
        let parsed = parse_atom("unsat").unwrap();
        assert_eq!(parsed.name, "unsat");
        assert!(parsed.args.is_empty());
    }
}
