//! Build script for minishell
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! shown by the `credits` command.

fn main() {
    println!("cargo:rerun-if-env-changed=MINISHELL_ELEVATION_METHOD");

    // Embed git commit, build time, and dirty status
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
