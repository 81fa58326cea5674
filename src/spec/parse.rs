// src/spec/parse.rs

//! Text form of package requests
//!
//! `zlib@1.2: +shared build_type=Release %gcc@12 arch=linux-ubuntu22-x86_64 ^cmake@3.20:`
//!
//! A request is a root constraint followed by `^`-prefixed dependency
//! constraints. Within a constraint, `@` starts a version list, `+`/`~`
//! toggle boolean variants, `%` names a compiler, and `key=value` sets a
//! valued variant or an architecture part.

use crate::error::{Error, Result};
use crate::spec::{ArchSpec, CompilerSpec, DepTypes, Spec, SpecGraph, SpecNode};
use crate::variant::{
    BoolValuedVariant, MultiValuedVariant, SingleValuedVariant, VariantSpec,
};
use crate::version::VersionList;

/// Parse a full request: root constraint plus `^` dependency constraints.
pub fn parse_spec(text: &str) -> Result<Spec> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::Parse("empty spec".to_string()));
    }

    let mut segments = text.split('^');
    let root_node = parse_node(segments.next().unwrap_or_default())?;

    let mut graph = SpecGraph::new();
    let root = graph.add_node(root_node)?;
    for segment in segments {
        let node = parse_node(segment)?;
        let child = graph.add_node(node)?;
        graph.add_edge(root, child, DepTypes::none(), None);
    }
    Ok(Spec::from_graph(graph, root))
}

/// Parse one constraint segment into a node.
fn parse_node(segment: &str) -> Result<SpecNode> {
    let node = parse_constraint(segment)?;
    if node.name.is_empty() {
        return Err(Error::Parse(format!(
            "constraint '{}' names no package",
            segment.trim()
        )));
    }
    Ok(node)
}

/// Parse a constraint that may leave the package name empty, like the
/// `+debug` in a `when` condition.
pub fn parse_constraint(segment: &str) -> Result<SpecNode> {
    let segment = segment.trim();
    if segment.is_empty() {
        return Err(Error::Parse("empty spec constraint".to_string()));
    }

    let mut node = SpecNode {
        versions: VersionList::any(),
        ..Default::default()
    };
    for chunk in segment.split_whitespace() {
        parse_chunk(chunk, &mut node)?;
    }
    Ok(node)
}

fn parse_chunk(chunk: &str, node: &mut SpecNode) -> Result<()> {
    let mut rest = chunk;
    while !rest.is_empty() {
        let (head, tail) = split_term(rest);
        rest = tail;
        match head.chars().next().unwrap() {
            '@' => {
                let versions = VersionList::parse(&head[1..])
                    .map_err(|e| Error::Parse(format!("in '{}': {}", chunk, e)))?;
                node.versions = if node.versions.is_any() {
                    versions
                } else {
                    node.versions.intersection(&versions)
                };
            }
            '+' => set_bool_variant(node, &head[1..], true)?,
            '~' => set_bool_variant(node, &head[1..], false)?,
            '%' => parse_compiler(node, &head[1..])?,
            _ => parse_word(node, head)?,
        }
    }
    Ok(())
}

/// Split off the leading term: a sigil plus its argument, ending at the
/// next sigil. `@` arguments may contain `-` and `=`; names stop at any
/// sigil character.
fn split_term(s: &str) -> (&str, &str) {
    let first = s.chars().next().unwrap_or_default();
    let from = usize::from(matches!(first, '@' | '+' | '~' | '%'));
    // Version and compiler arguments keep their @; names and key=value
    // words stop at any sigil
    let stop: &[char] = match first {
        '@' | '%' => &['+', '~', '%'],
        _ => &['@', '+', '~', '%'],
    };
    match s[from..].find(stop) {
        Some(pos) => s.split_at(from + pos),
        None => (s, ""),
    }
}

fn set_bool_variant(node: &mut SpecNode, name: &str, value: bool) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Parse("missing variant name after +/~".to_string()));
    }
    node.variants
        .insert(VariantSpec::Bool(BoolValuedVariant::new(name, value)))
}

fn parse_compiler(node: &mut SpecNode, term: &str) -> Result<()> {
    if term.is_empty() {
        return Err(Error::Parse("missing compiler name after %".to_string()));
    }
    let (name, versions) = match term.split_once('@') {
        Some((name, vers)) => (name, VersionList::parse(vers)?),
        None => (term, VersionList::any()),
    };
    node.compiler = Some(CompilerSpec::new(name, versions));
    Ok(())
}

/// A bare word: the package name, an `arch=`/`platform=`/`os=`/`target=`
/// setting, or a valued variant.
fn parse_word(node: &mut SpecNode, word: &str) -> Result<()> {
    match word.split_once('=') {
        None => {
            if !node.name.is_empty() {
                return Err(Error::Parse(format!(
                    "unexpected token '{}' after package name '{}'",
                    word, node.name
                )));
            }
            if !word
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(Error::Parse(format!("invalid package name '{}'", word)));
            }
            node.name = word.to_string();
            Ok(())
        }
        Some(("arch", value)) => {
            let parts: Vec<&str> = value.split('-').collect();
            if parts.len() != 3 {
                return Err(Error::Parse(format!(
                    "arch '{}' is not platform-os-target",
                    value
                )));
            }
            node.arch.constrain(&ArchSpec::new(parts[0], parts[1], parts[2]))?;
            Ok(())
        }
        Some(("platform", value)) => {
            node.arch.constrain(&ArchSpec {
                platform: Some(value.to_string()),
                ..Default::default()
            })?;
            Ok(())
        }
        Some(("os", value)) => {
            node.arch.constrain(&ArchSpec {
                os: Some(value.to_string()),
                ..Default::default()
            })?;
            Ok(())
        }
        Some(("target", value)) => {
            node.arch.constrain(&ArchSpec {
                target: Some(value.to_string()),
                ..Default::default()
            })?;
            Ok(())
        }
        Some((name, value)) => {
            // Typed against the package declaration later; the textual
            // shape decides the provisional kind
            let vspec = match value.to_ascii_lowercase().as_str() {
                "true" | "false" => {
                    VariantSpec::Bool(BoolValuedVariant::parse(name, value)?)
                }
                _ if value.contains(',') => {
                    VariantSpec::Multi(MultiValuedVariant::parse(name, value))
                }
                _ => VariantSpec::Single(SingleValuedVariant::new(name, value)),
            };
            node.variants.insert(vspec)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let spec = parse_spec("zlib").unwrap();
        assert_eq!(spec.name(), "zlib");
        assert!(spec.root().versions.is_any());
    }

    #[test]
    fn test_parse_version_constraint() {
        let spec = parse_spec("zlib@1.2:").unwrap();
        assert_eq!(spec.root().versions.to_string(), "1.2:");
    }

    #[test]
    fn test_parse_exact_version() {
        let spec = parse_spec("zlib@=1.2.13").unwrap();
        assert!(spec.root().versions.concrete().is_some());
    }

    #[test]
    fn test_parse_bool_variants_concatenated() {
        let spec = parse_spec("zlib+shared~static").unwrap();
        assert_eq!(spec.root().variants.len(), 2);
        assert_eq!(spec.root().variants.to_string(), "+shared~static");
    }

    #[test]
    fn test_parse_valued_variants() {
        let spec = parse_spec("hdf5 build_type=Release apis=v110,v112").unwrap();
        let bt = spec.root().variants.get("build_type").unwrap();
        assert_eq!(bt.value_strings(), vec!["Release"]);
        let apis = spec.root().variants.get("apis").unwrap();
        assert_eq!(apis.value_strings(), vec!["v110", "v112"]);
    }

    #[test]
    fn test_parse_compiler() {
        let spec = parse_spec("zlib%gcc@12.2").unwrap();
        let compiler = spec.root().compiler.as_ref().unwrap();
        assert_eq!(compiler.name, "gcc");
        assert_eq!(compiler.versions.to_string(), "12.2");
    }

    #[test]
    fn test_parse_arch_triple() {
        let spec = parse_spec("zlib arch=linux-ubuntu22-x86_64").unwrap();
        let arch = &spec.root().arch;
        assert_eq!(arch.platform.as_deref(), Some("linux"));
        assert_eq!(arch.os.as_deref(), Some("ubuntu22"));
        assert_eq!(arch.target.as_deref(), Some("x86_64"));
    }

    #[test]
    fn test_parse_target_alone() {
        let spec = parse_spec("zlib target=aarch64").unwrap();
        assert_eq!(spec.root().arch.target.as_deref(), Some("aarch64"));
        assert!(spec.root().arch.platform.is_none());
    }

    #[test]
    fn test_parse_dependencies() {
        let spec = parse_spec("app@2: +gui ^zlib@1.2: ^cmake build_type=Release").unwrap();
        assert_eq!(spec.graph().len(), 3);
        let zlib = spec.graph().find("zlib").unwrap();
        assert_eq!(spec.graph().node(zlib).versions.to_string(), "1.2:");
        let deps = spec.graph().dependencies_of(spec.root_id());
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn test_parse_combined_chunk() {
        let spec = parse_spec("foo@1.2:1.4+debug%clang@15").unwrap();
        assert_eq!(spec.root().versions.to_string(), "1.2:1.4");
        assert!(spec.root().variants.contains("debug"));
        assert_eq!(spec.root().compiler.as_ref().unwrap().name, "clang");
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_spec("").is_err());
        assert!(parse_spec("foo bar").is_err());
        assert!(parse_spec("foo +").is_err());
        assert!(parse_spec("foo arch=linux").is_err());
        assert!(parse_spec("foo ^").is_err());
    }

    #[test]
    fn test_parse_display_reparse() {
        let spec = parse_spec("app@2.0:3.0+gui build_type=Release %gcc@12 ^zlib@1.2:").unwrap();
        let reparsed = parse_spec(&spec.to_string()).unwrap();
        assert_eq!(spec, reparsed);
    }
}
