use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "clicker-relay")]
#[command(about = "Relay between classroom clicker devices and exercise browsers")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// JSON config file; command line flags override its values
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Address to serve websockets on
	#[arg(long)]
	pub host: Option<String>,

	#[arg(short, long)]
	pub port: Option<u16>,

	/// Address of the device aggregator
	#[arg(long, value_name = "HOST")]
	pub device_host: Option<String>,

	#[arg(long, value_name = "PORT")]
	pub device_port: Option<u16>,

	/// App started for every new session
	#[arg(long)]
	pub app: Option<String>,

	/// Directory exercise logs are written to
	#[arg(long, value_name = "DIR")]
	pub log_dir: Option<PathBuf>,

	/// Log filter directives, e.g. "info,clicker.hub=debug"
	#[arg(long, value_name = "FILTER")]
	pub log_filter: Option<String>,
}
