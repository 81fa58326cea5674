// tests/common/mod.rs

//! Shared fixtures for integration tests.

use strata::{CompilerDecl, ConcretizerConfig, MemoryRepository, PackageDef, VariantDef};

/// A small repository: `foo` (two versions, one bool variant), `bar`
/// (links against foo@1.0:), `baz` (a conflict between +x and +y), and
/// an `mpi` virtual with two providers.
pub fn sample_repo() -> MemoryRepository {
    MemoryRepository::new()
        .with(
            PackageDef::new("foo")
                .with_version("1.0")
                .with_version("2.0")
                .with_variant(VariantDef::bool("shared", true)),
        )
        .with(
            PackageDef::new("bar")
                .with_version("0.9")
                .depends_on_typed("foo@1.0:", strata::DepTypes::LINK),
        )
        .with(
            PackageDef::new("baz")
                .with_version("1.0")
                .with_variant(VariantDef::bool("x", false))
                .with_variant(VariantDef::bool("y", false))
                .conflicts_with("+x", Some("+y")),
        )
        .with(PackageDef::new("mpich").with_version("4.1").provides("mpi"))
        .with(
            PackageDef::new("openmpi")
                .with_version("4.1.5")
                .provides("mpi"),
        )
        .with(
            PackageDef::new("mpiapp")
                .with_version("1.0")
                .depends_on("mpi"),
        )
}

pub fn sample_config() -> ConcretizerConfig {
    let mut config = ConcretizerConfig {
        compilers: vec![CompilerDecl::new("gcc", "12.2.0")],
        ..Default::default()
    };
    config.arch.platform = "linux".to_string();
    config.arch.os = "ubuntu22".to_string();
    config.arch.target = "x86_64".to_string();
    config
}
