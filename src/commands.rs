//! Command line subcommands.

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Install the configured cache generation and purge older ones
  Install,

  /// Request a path through the controller and print the response
  Fetch {
    /// Path (or absolute URL) on the origin
    path: String,

    /// Treat as a page navigation (offline page fallback)
    #[arg(long)]
    navigate: bool,
  },

  /// Submit the intake form through the controller
  Submit {
    /// Form field as name=value; repeat a name for multi-valued fields
    #[arg(short, long = "field", value_parser = parse_field)]
    fields: Vec<(String, String)>,

    /// Endpoint path (default: configured submit path)
    #[arg(long)]
    path: Option<String>,
  },

  /// Deliver a background sync event now
  Sync {
    /// Sync tag (default: configured tag)
    #[arg(long)]
    tag: Option<String>,
  },

  /// Deliver a push message
  Push {
    /// Text to show; omitted means an empty push
    text: Option<String>,
  },

  /// Simulate a click on the replay confirmation notification
  Click,

  /// List queued submissions
  Queue,

  /// List caches and their entry counts
  Caches,

  /// Watch connectivity and replay queued submissions when the origin is reachable
  Watch,
}

/// Parse a `name=value` form field. The value may be empty or contain '='.
pub fn parse_field(input: &str) -> Result<(String, String), String> {
  match input.split_once('=') {
    Some((name, value)) if !name.trim().is_empty() => {
      Ok((name.trim().to_string(), value.to_string()))
    }
    _ => Err(format!("expected name=value, got '{}'", input)),
  }
}
