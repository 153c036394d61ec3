use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::Command;

const EBPF_CRATE_DIR: &str = "crates/probe-engine/ebpf";
const EBPF_TARGET: &str = "bpfel-unknown-none";
const EBPF_BINARY: &str = "flowtally-ebpf";

/// flowtally 빌드 태스크
#[derive(Parser)]
#[command(name = "xtask")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// XDP 커널 프로그램 빌드
    BuildEbpf {
        /// 릴리스 모드로 빌드
        #[arg(long)]
        release: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::BuildEbpf { release } => {
            build_ebpf(release);
        }
    }
}

fn build_ebpf(release: bool) {
    let mut cmd = Command::new("cargo");
    cmd.current_dir(EBPF_CRATE_DIR);

    cmd.args([
        "+nightly",
        "build",
        &format!("--target={EBPF_TARGET}"),
        "-Z",
        "build-std=core",
    ]);

    if release {
        cmd.arg("--release");
    }

    let status = match cmd.status() {
        Ok(status) => status,
        Err(e) => {
            eprintln!("failed to run cargo for XDP build: {e}");
            std::process::exit(1);
        }
    };
    if !status.success() {
        eprintln!("XDP build failed");
        std::process::exit(1);
    }

    println!("XDP build succeeded: {}", object_path(release).display());
}

/// `probe.object_path`에 지정할 빌드 산출물 경로
fn object_path(release: bool) -> PathBuf {
    let profile = if release { "release" } else { "debug" };
    [EBPF_CRATE_DIR, "target", EBPF_TARGET, profile, EBPF_BINARY]
        .iter()
        .collect()
}
