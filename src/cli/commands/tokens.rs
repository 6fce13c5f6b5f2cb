use clap::{Arg, ArgMatches, Command};

pub const ARG_DOMAIN: &str = "domain";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl";
pub const ARG_LOGON_CODE_TTL: &str = "logon-code-ttl";
pub const ARG_KEY_BITS: &str = "key-bits";

pub const MAX_ACCESS_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
pub const MAX_REFRESH_TOKEN_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;
pub const MAX_LOGON_CODE_TTL_MINUTES: i64 = 24 * 60;
pub const MIN_KEY_BITS: usize = crate::tokens::DEFAULT_KEY_BITS;
pub const MAX_KEY_BITS: usize = 4096;

#[derive(Debug)]
pub struct Options {
    pub domain: String,
    pub issuer: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub logon_code_ttl_minutes: i64,
    pub key_bits: usize,
}

impl Options {
    /// Parse token arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the domain is missing, a lifetime is not positive or
    /// above its ceiling, or the key size is outside `MIN_KEY_BITS..=MAX_KEY_BITS`.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let domain = match matches.get_one::<String>(ARG_DOMAIN) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => anyhow::bail!("missing required argument: --{ARG_DOMAIN}"),
        };

        let lifetime = |id: &str, max: i64| -> anyhow::Result<i64> {
            match matches.get_one::<i64>(id).copied() {
                Some(value) if value <= 0 => anyhow::bail!("--{id} must be positive, got {value}"),
                Some(value) if value > max => {
                    anyhow::bail!("--{id} must be at most {max}, got {value}")
                }
                Some(value) => Ok(value),
                None => anyhow::bail!("missing required argument: --{id}"),
            }
        };

        let key_bits = matches
            .get_one::<usize>(ARG_KEY_BITS)
            .copied()
            .unwrap_or(crate::tokens::DEFAULT_KEY_BITS);
        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&key_bits) {
            anyhow::bail!(
                "--{ARG_KEY_BITS} must be between {MIN_KEY_BITS} and {MAX_KEY_BITS}, got {key_bits}"
            );
        }

        Ok(Self {
            domain,
            issuer: matches
                .get_one::<String>(ARG_ISSUER)
                .cloned()
                .unwrap_or_else(|| crate::tokens::DEFAULT_ISSUER.to_string()),
            access_ttl_seconds: lifetime(ARG_ACCESS_TOKEN_TTL, MAX_ACCESS_TOKEN_TTL_SECONDS)?,
            refresh_ttl_seconds: lifetime(ARG_REFRESH_TOKEN_TTL, MAX_REFRESH_TOKEN_TTL_SECONDS)?,
            logon_code_ttl_minutes: lifetime(ARG_LOGON_CODE_TTL, MAX_LOGON_CODE_TTL_MINUTES)?,
            key_bits,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DOMAIN)
                .long(ARG_DOMAIN)
                .help("Domain tokens are issued for, used as the audience claim")
                .env("BULWARK_DOMAIN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer claim of every token")
                .env("BULWARK_ISSUER")
                .default_value("bulwark-auth"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Access token lifetime in seconds")
                .env("BULWARK_ACCESS_TOKEN_TTL")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token lifetime in seconds")
                .env("BULWARK_REFRESH_TOKEN_TTL")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_LOGON_CODE_TTL)
                .long(ARG_LOGON_CODE_TTL)
                .help("One-time logon code lifetime in minutes")
                .env("BULWARK_LOGON_CODE_TTL")
                .default_value("10")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_KEY_BITS)
                .long(ARG_KEY_BITS)
                .help("RSA modulus size for generated signing keys")
                .env("BULWARK_KEY_BITS")
                .default_value("2048")
                .value_parser(clap::value_parser!(usize)),
        )
}
