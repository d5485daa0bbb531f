// ABOUTME: Build script for compile-time feature validation
// ABOUTME: Warns when no remote platform feature is enabled (terminal and WhatsApp only)

fn main() {
    // cfg!(feature) reflects the build script's own features, so read Cargo's env instead
    let enabled = |feature: &str| std::env::var_os(format!("CARGO_FEATURE_{}", feature)).is_some();

    let has_telegram = enabled("TELEGRAM");
    let has_slack = enabled("SLACK");
    let has_matrix = enabled("MATRIX");

    if !has_telegram && !has_slack && !has_matrix {
        println!(
            "cargo::warning=No remote platform features enabled. \
             Only the terminal and WhatsApp bridge connectors will be available. \
             Enable at least one of: telegram, slack, matrix"
        );
    }
}
