use colored::Colorize;
use once_cell::sync::Lazy;

pub static SUCCESS: Lazy<colored::ColoredString> = Lazy::new(|| "[usrsvc]".green());
pub static FAIL: Lazy<colored::ColoredString> = Lazy::new(|| "[usrsvc]".red());
pub static WARN: Lazy<colored::ColoredString> = Lazy::new(|| "[usrsvc]".yellow());

/// Version banner, built from `build.rs`-injected env vars: package version,
/// build date, profile, and (if available) a short git hash.
pub fn version() -> String {
    match env!("GIT_HASH") {
        "" => format!("{} ({}) [{}]", env!("CARGO_PKG_VERSION"), env!("BUILD_DATE"), env!("PROFILE")),
        hash => format!("{} ({} {hash}) [{}]", env!("CARGO_PKG_VERSION"), env!("BUILD_DATE"), env!("PROFILE")),
    }
}

/// Render a kilobyte quantity (as used by `rss_limit`) as a human size.
pub fn format_kb(kb: u64) -> String {
    const UNIT: f64 = 1024.0;
    const SUFFIX: [&str; 3] = ["kb", "mb", "gb"];

    if kb == 0 {
        return "0kb".to_string();
    }

    let size = kb as f64;
    let base = (size.log10() / UNIT.log10()).floor().min(2.0);

    let mut buffer = ryu::Buffer::new();
    let result = buffer
        .format((size / UNIT.powf(base) * 10.0).round() / 10.0)
        .trim_end_matches(".0")
        .to_string();

    format!("{result}{}", SUFFIX[base as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_kb_with_the_right_suffix() {
        assert_eq!(format_kb(0), "0kb");
        assert_eq!(format_kb(512), "512kb");
        assert_eq!(format_kb(2048), "2mb");
    }

    #[test]
    fn version_string_contains_the_package_version() {
        assert!(version().contains(env!("CARGO_PKG_VERSION")));
    }
}
