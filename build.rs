//! Build script for secgroup
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! for `secgroup --version`.

fn main() {
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
