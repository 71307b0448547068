// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

//! Build-time version metadata, printed by `-version` and logged at startup.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT: &str = "unknown";
pub const BUILD_STAMP: &str = "unknown";

pub fn fprint_version(out: &mut dyn std::io::Write) -> std::io::Result<()> {
    writeln!(out, "Version:    {}", VERSION)?;
    writeln!(out, "Git commit: {}", GIT_COMMIT)?;
    writeln!(out, "Build:      {}", BUILD_STAMP)
}

pub fn print_version() {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    let _ = fprint_version(&mut lock);
}
