//! Panel command parsing
//!
//! Parses slash commands read from stdin, e.g. `/start 65435` or `/peers`.

/// Parsed panel command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCommand {
    /// Start the peer, on the configured port unless one is given
    Start(Option<u16>),
    /// Request the peer roster
    Peers,
    /// Print the current state
    Status,
    /// Restart the backend process
    Restart,
    Help,
    Quit,
    /// Unknown command name
    Unknown(String),
}

/// Error parsing a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Empty command
    Empty,
    /// Port argument is not a valid port number
    InvalidPort(String),
    /// Invalid syntax
    InvalidSyntax(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty command"),
            ParseError::InvalidPort(port) => write!(f, "invalid port: {}", port),
            ParseError::InvalidSyntax(msg) => write!(f, "invalid syntax: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// Help text listing the supported commands
pub const HELP: &str = "\
Commands:
  /start [port]  start the peer (default port from config)
  /peers         request the peer list
  /status        show status and peers
  /restart       restart the backend process
  /help          show this help
  /quit          stop the backend and exit";

/// Parse a command string into a [`PanelCommand`]
///
/// # Supported commands
///
/// - `/start [port]`
/// - `/peers`
/// - `/status`
/// - `/restart`
/// - `/help`
/// - `/quit` (alias `/exit`)
pub fn parse_command(input: &str) -> Result<PanelCommand, ParseError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(ParseError::Empty);
    }

    let Some(body) = input.strip_prefix('/') else {
        return Err(ParseError::InvalidSyntax(
            "command must start with /".to_string(),
        ));
    };

    let mut parts = body.split_whitespace();
    let name = parts.next().map(str::to_lowercase).unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let command = match name.as_str() {
        "start" => PanelCommand::Start(parse_port_arg(&args)?),
        "peers" => no_args(PanelCommand::Peers, &args)?,
        "status" => no_args(PanelCommand::Status, &args)?,
        "restart" => no_args(PanelCommand::Restart, &args)?,
        "help" => PanelCommand::Help,
        "quit" | "exit" => PanelCommand::Quit,
        _ => PanelCommand::Unknown(name),
    };
    Ok(command)
}

fn parse_port_arg(args: &[&str]) -> Result<Option<u16>, ParseError> {
    match args {
        [] => Ok(None),
        [port] => port
            .parse::<u16>()
            .map(Some)
            .map_err(|_| ParseError::InvalidPort(port.to_string())),
        _ => Err(ParseError::InvalidSyntax(
            "/start takes at most one port".to_string(),
        )),
    }
}

fn no_args(command: PanelCommand, args: &[&str]) -> Result<PanelCommand, ParseError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(ParseError::InvalidSyntax(format!(
            "unexpected argument '{}'",
            args[0]
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        assert_eq!(parse_command("/start"), Ok(PanelCommand::Start(None)));
        assert_eq!(parse_command("/start 65435"), Ok(PanelCommand::Start(Some(65435))));
        assert_eq!(parse_command("  /START   7000 "), Ok(PanelCommand::Start(Some(7000))));
    }

    #[test]
    fn test_parse_start_invalid_port() {
        assert_eq!(
            parse_command("/start 70000"),
            Err(ParseError::InvalidPort("70000".into()))
        );
        assert_eq!(
            parse_command("/start abc"),
            Err(ParseError::InvalidPort("abc".into()))
        );
        assert!(matches!(
            parse_command("/start 1 2"),
            Err(ParseError::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("/peers"), Ok(PanelCommand::Peers));
        assert_eq!(parse_command("/status"), Ok(PanelCommand::Status));
        assert_eq!(parse_command("/restart"), Ok(PanelCommand::Restart));
        assert_eq!(parse_command("/help"), Ok(PanelCommand::Help));
        assert_eq!(parse_command("/quit"), Ok(PanelCommand::Quit));
        assert_eq!(parse_command("/exit"), Ok(PanelCommand::Quit));
    }

    #[test]
    fn test_parse_unexpected_argument() {
        let err = parse_command("/peers now").unwrap_err();
        assert_eq!(err.to_string(), "invalid syntax: unexpected argument 'now'");
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_command(""), Err(ParseError::Empty));
        assert_eq!(parse_command("   "), Err(ParseError::Empty));
    }

    #[test]
    fn test_parse_missing_slash() {
        assert!(matches!(
            parse_command("start"),
            Err(ParseError::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            parse_command("/connect 10.0.0.2"),
            Ok(PanelCommand::Unknown("connect".into()))
        );
        assert_eq!(parse_command("/"), Ok(PanelCommand::Unknown(String::new())));
    }

    #[test]
    fn test_parse_error_display() {
        assert_eq!(ParseError::Empty.to_string(), "empty command");
        assert_eq!(
            ParseError::InvalidPort("x".into()).to_string(),
            "invalid port: x"
        );
    }

    #[test]
    fn test_help_lists_commands() {
        for name in ["/start", "/peers", "/status", "/restart", "/help", "/quit"] {
            assert!(HELP.contains(name), "missing {}", name);
        }
    }
}
