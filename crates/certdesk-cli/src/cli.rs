//! Command-line parsing.

use std::path::PathBuf;

use thiserror::Error;

pub const CONFIG_ENV_VAR: &str = "CERTDESK_CONFIG";

pub const USAGE: &str = "\
Usage: certdesk [--config <path>] [--json] [--log-json] <command> [args]

Commands:
  login <email>                            Log in (password from CERTDESK_PASSWORD
                                           or CERTDESK_PASSWORD_FILE)
  logout                                   Forget the stored session
  whoami                                   Show the logged-in user
  preview <csv>                            Validate a CSV without issuing
  bulk <csv> [folder-link]                 Issue every row and follow progress
  issue <name> <email> <certificate> [file]
                                           Issue one certificate
  verify <file>                            Verify a certificate file
  public-verify <id>                       Verify a certificate id without logging in
  search [query] [page]                    Search issued certificates

Options:
  --config <path>   Config file (default: $CERTDESK_CONFIG or the platform config dir)
  --json            Print results as JSON
  --log-json        Emit logs as JSON lines
";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct UsageError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login {
        email: String,
    },
    Logout,
    Whoami,
    Preview {
        csv: PathBuf,
    },
    Bulk {
        csv: PathBuf,
        folder_link: Option<String>,
    },
    Issue {
        name: String,
        email: String,
        certificate: String,
        file: Option<PathBuf>,
    },
    Verify {
        file: PathBuf,
    },
    PublicVerify {
        id: String,
    },
    Search {
        query: Option<String>,
        page: u32,
    },
    Help,
}

impl Command {
    /// Whether the command runs against a restored session. Logout works
    /// without one so a stale token can always be cleared.
    pub fn needs_session(&self) -> bool {
        !matches!(
            self,
            Command::Login { .. } | Command::Logout | Command::PublicVerify { .. } | Command::Help
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub config: Option<PathBuf>,
    pub json: bool,
    pub log_json: bool,
    pub command: Command,
}

impl Cli {
    pub fn from_env() -> Result<Self, UsageError> {
        let mut cli = Self::parse(std::env::args().skip(1))?;
        if cli.config.is_none() {
            cli.config = std::env::var_os(CONFIG_ENV_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from);
        }
        Ok(cli)
    }

    pub fn parse<I>(args: I) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = None;
        let mut json = false;
        let mut log_json = false;
        let mut positional = Vec::new();

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args
                        .next()
                        .ok_or_else(|| UsageError("--config needs a path".to_string()))?;
                    config = Some(PathBuf::from(path));
                }
                "--json" => json = true,
                "--log-json" => log_json = true,
                "-h" | "--help" => positional = vec!["help".to_string()],
                flag if flag.starts_with("--") => {
                    return Err(UsageError(format!("unknown option '{}'", flag)));
                }
                _ => positional.push(arg),
            }
        }

        Ok(Self {
            config,
            json,
            log_json,
            command: parse_command(&positional)?,
        })
    }
}

fn parse_command(args: &[String]) -> Result<Command, UsageError> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };

    let command = match (name.as_str(), rest) {
        ("help", _) => Command::Help,
        ("login", [email]) => Command::Login {
            email: email.clone(),
        },
        ("logout", []) => Command::Logout,
        ("whoami", []) => Command::Whoami,
        ("preview", [csv]) => Command::Preview {
            csv: PathBuf::from(csv),
        },
        ("bulk", [csv]) => Command::Bulk {
            csv: PathBuf::from(csv),
            folder_link: None,
        },
        ("bulk", [csv, link]) => Command::Bulk {
            csv: PathBuf::from(csv),
            folder_link: Some(link.clone()),
        },
        ("issue", [name, email, certificate, file @ ..]) if file.len() <= 1 => Command::Issue {
            name: name.clone(),
            email: email.clone(),
            certificate: certificate.clone(),
            file: file.first().map(PathBuf::from),
        },
        ("verify", [file]) => Command::Verify {
            file: PathBuf::from(file),
        },
        ("public-verify", [id]) => Command::PublicVerify { id: id.clone() },
        ("search", []) => Command::Search {
            query: None,
            page: 1,
        },
        ("search", [query]) => Command::Search {
            query: Some(query.clone()),
            page: 1,
        },
        ("search", [query, page]) => Command::Search {
            query: Some(query.clone()),
            page: parse_page(page)?,
        },
        (
            "login" | "logout" | "whoami" | "preview" | "bulk" | "issue" | "verify"
            | "public-verify" | "search",
            _,
        ) => {
            return Err(UsageError(format!("wrong arguments for '{}'", name)));
        }
        (other, _) => return Err(UsageError(format!("unknown command '{}'", other))),
    };
    Ok(command)
}

fn parse_page(value: &str) -> Result<u32, UsageError> {
    match value.parse::<u32>() {
        Ok(page) if page >= 1 => Ok(page),
        _ => Err(UsageError(format!("invalid page '{}'", value))),
    }
}
