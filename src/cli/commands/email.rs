use clap::{Arg, ArgMatches, Command};

pub const ARG_VERIFICATION_URL: &str = "verification-url";
pub const ARG_FORGOT_PASSWORD_URL: &str = "forgot-password-url";
pub const ARG_MAGIC_URL: &str = "magic-url";

/// Link bases mailed to users.
#[derive(Debug)]
pub struct Options {
    pub verification_url: String,
    pub forgot_password_url: String,
    pub magic_url: String,
}

impl Options {
    /// Parse email link arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a link base is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let required = |id: &str| -> anyhow::Result<String> {
            match matches.get_one::<String>(id) {
                Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
                _ => anyhow::bail!("missing required argument: --{id}"),
            }
        };

        Ok(Self {
            verification_url: required(ARG_VERIFICATION_URL)?,
            forgot_password_url: required(ARG_FORGOT_PASSWORD_URL)?,
            magic_url: required(ARG_MAGIC_URL)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERIFICATION_URL)
                .long(ARG_VERIFICATION_URL)
                .help("Base URL of the account verification page")
                .env("BULWARK_VERIFICATION_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_FORGOT_PASSWORD_URL)
                .long(ARG_FORGOT_PASSWORD_URL)
                .help("Base URL of the password reset page")
                .env("BULWARK_FORGOT_PASSWORD_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_MAGIC_URL)
                .long(ARG_MAGIC_URL)
                .help("Base URL of the one-time code sign-in page")
                .env("BULWARK_MAGIC_URL")
                .required(true),
        )
}
