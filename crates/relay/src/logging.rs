//! Log setup for the relay binary.
//!
//! Filter precedence: `RUST_LOG`, then `logFilter` from the config file,
//! then the preset picked by `-v` flags.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Filter directives for a verbosity count.
///
/// The device link pings every few seconds, so it stays a level quieter
/// than the rest until `-vvv`.
pub fn preset(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "warn,clicker.device=error",
		1 => "info,clicker.device=warn",
		2 => "debug,clicker.device=info",
		_ => "trace",
	}
}

/// Directives used when `RUST_LOG` is unset.
pub fn directives(verbosity: u8, configured: Option<&str>) -> String {
	match configured.map(str::trim) {
		Some(filter) if !filter.is_empty() => filter.to_string(),
		_ => preset(verbosity).to_string(),
	}
}

pub fn init_logging(verbosity: u8, configured: Option<&str>) {
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(directives(verbosity, configured)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn configured_filter_beats_the_verbosity_preset() {
		assert_eq!(directives(0, None), "warn,clicker.device=error");
		assert_eq!(directives(2, None), "debug,clicker.device=info");
		assert_eq!(directives(9, None), "trace");
		assert_eq!(directives(0, Some("clicker.hub=trace")), "clicker.hub=trace");
		assert_eq!(directives(1, Some("  ")), preset(1));
	}

	#[test]
	fn presets_parse_as_filters() {
		for verbosity in 0..4 {
			let parsed = preset(verbosity).parse::<EnvFilter>();
			assert!(parsed.is_ok(), "preset {verbosity} does not parse");
		}
	}
}
