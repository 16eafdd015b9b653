use std::process::Command;

const SHA_OVERRIDE: &str = "PARLEY_GIT_SHA";

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");
    println!("cargo:rerun-if-env-changed={SHA_OVERRIDE}");

    // Source tarballs have no .git; packagers can pass the commit instead.
    let sha = std::env::var(SHA_OVERRIDE)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(git_head);

    if let Some(sha) = sha {
        println!("cargo:rustc-env=PARLEY_BUILD_GIT_SHA={sha}");
    }
}

fn git_head() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=12", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}
