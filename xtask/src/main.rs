#![deny(unused_must_use)]

//! Developer task runner for the `canboot` workspace, in the teacher's
//! `xshell` + `anyhow` idiom (`rustBoot/xtask`): a thin `env::args`
//! dispatcher instead of a `clap` subcommand tree, since this binary is
//! only ever invoked as `cargo xtask <task>`.

use std::env;
use std::path::PathBuf;

use xshell::cmd;

fn main() -> Result<(), anyhow::Error> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let args = args.iter().map(|s| &**s).collect::<Vec<_>>();

    match &args[..] {
        ["test"] => test_workspace(),
        ["lint"] => lint_workspace(),
        ["coverage"] => coverage(),
        _ => {
            println!("USAGE: cargo xtask test");
            println!("OR");
            println!("USAGE: cargo xtask lint");
            println!("OR");
            println!("USAGE: cargo xtask coverage");
            Ok(())
        }
    }
}

/// Runs every crate's test suite, including `canboot`'s own `no_std`
/// core built against `std` under `#[cfg(test)]` (see `canboot/src/lib.rs`).
fn test_workspace() -> Result<(), anyhow::Error> {
    let _p = xshell::pushd(root_dir())?;
    cmd!("cargo test --workspace --all-features").run()?;
    Ok(())
}

/// `cargo fmt --check` plus `clippy` with warnings denied, the way a CI
/// gate would run it.
fn lint_workspace() -> Result<(), anyhow::Error> {
    let _p = xshell::pushd(root_dir())?;
    cmd!("cargo fmt --all -- --check").run()?;
    cmd!("cargo clippy --workspace --all-features --all-targets -- -D warnings").run()?;
    Ok(())
}

fn coverage() -> Result<(), anyhow::Error> {
    let _p = xshell::pushd(root_dir())?;
    cmd!("cargo llvm-cov --workspace --all-features --lcov --output-path lcov.info").run()?;
    Ok(())
}

fn root_dir() -> PathBuf {
    let mut xtask_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    xtask_dir.pop();
    xtask_dir
}
