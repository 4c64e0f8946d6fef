use std::env;
use std::process::Command;

/// Stamps the build for `pagewright info`. Packagers building outside a checkout can pin the
/// values through `PAGEWRIGHT_GIT_HASH`, `PAGEWRIGHT_GIT_BRANCH` and `PAGEWRIGHT_BUILD_DATE`.
fn main() {
    let build_date = stamp("PAGEWRIGHT_BUILD_DATE").unwrap_or_else(|| {
        chrono::Utc::now()
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string()
    });
    let hash = stamp("PAGEWRIGHT_GIT_HASH").or_else(|| git(&["rev-parse", "--short", "HEAD"]));
    let branch =
        stamp("PAGEWRIGHT_GIT_BRANCH").or_else(|| git(&["rev-parse", "--abbrev-ref", "HEAD"]));

    println!("cargo:rustc-env=BUILD_DATE={build_date}");
    println!("cargo:rustc-env=GIT_HASH={}", hash.as_deref().unwrap_or("unknown"));
    println!("cargo:rustc-env=GIT_BRANCH={}", branch.as_deref().unwrap_or("unknown"));

    // HEAD moves on checkout; the branch ref moves on commit
    println!("cargo:rerun-if-changed=.git/HEAD");
    if let Some(reference) = git(&["symbolic-ref", "-q", "HEAD"]) {
        println!("cargo:rerun-if-changed=.git/{reference}");
    }
}

fn stamp(var: &str) -> Option<String> {
    println!("cargo:rerun-if-env-changed={var}");
    env::var(var).ok().filter(|value| !value.trim().is_empty())
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}
