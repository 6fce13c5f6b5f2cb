//! Map validated CLI arguments to the action to run.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_ALLOWED_ORIGINS, ARG_DSN, ARG_GOOGLE_CLIENT_ID, ARG_PORT, email, tokens};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --dsn")?;

    let token_opts = tokens::Options::parse(matches)?;
    let email_opts = email::Options::parse(matches)?;

    let google_client_id = matches
        .get_one::<String>(ARG_GOOGLE_CLIENT_ID)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let allowed_origins = matches
        .get_many::<String>(ARG_ALLOWED_ORIGINS)
        .map(|values| {
            values
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(Action::Server(Args {
        port,
        dsn,
        domain: token_opts.domain,
        issuer: token_opts.issuer,
        access_ttl_seconds: token_opts.access_ttl_seconds,
        refresh_ttl_seconds: token_opts.refresh_ttl_seconds,
        logon_code_ttl_minutes: token_opts.logon_code_ttl_minutes,
        key_bits: token_opts.key_bits,
        verification_url: email_opts.verification_url,
        forgot_password_url: email_opts.forgot_password_url,
        magic_url: email_opts.magic_url,
        google_client_id,
        allowed_origins,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    type EnvVars = Vec<(&'static str, Option<&'static str>)>;

    /// A complete environment with `overrides` applied.
    fn vars(overrides: &[(&'static str, Option<&'static str>)]) -> EnvVars {
        let mut vars: EnvVars = vec![
            ("BULWARK_PORT", None),
            ("BULWARK_DSN", Some("postgres://user@localhost:5432/bulwark")),
            ("BULWARK_DOMAIN", Some("bulwark.dev")),
            ("BULWARK_ISSUER", None),
            ("BULWARK_ACCESS_TOKEN_TTL", None),
            ("BULWARK_REFRESH_TOKEN_TTL", None),
            ("BULWARK_LOGON_CODE_TTL", None),
            ("BULWARK_KEY_BITS", None),
            ("BULWARK_VERIFICATION_URL", Some("https://bulwark.dev/verify")),
            ("BULWARK_FORGOT_PASSWORD_URL", Some("https://bulwark.dev/reset")),
            ("BULWARK_MAGIC_URL", Some("https://bulwark.dev/magic")),
            ("BULWARK_GOOGLE_CLIENT_ID", None),
            ("BULWARK_ALLOWED_ORIGINS", None),
            ("BULWARK_LOG_LEVEL", None),
        ];
        for (key, value) in overrides {
            if let Some(slot) = vars.iter_mut().find(|(name, _)| name == key) {
                slot.1 = *value;
            }
        }
        vars
    }

    fn dispatch() -> Result<Action> {
        let matches = crate::cli::commands::new().get_matches_from(vec!["bulwark"]);
        handler(&matches)
    }

    #[test]
    fn server_args_from_env() {
        let env = vars(&[
            ("BULWARK_LOGON_CODE_TTL", Some("5")),
            ("BULWARK_GOOGLE_CLIENT_ID", Some("  ")),
            (
                "BULWARK_ALLOWED_ORIGINS",
                Some("https://app.bulwark.dev, ,http://localhost:5173"),
            ),
        ]);
        temp_env::with_vars(env, || {
            let result = dispatch();
            assert!(result.is_ok());
            if let Ok(Action::Server(args)) = result {
                assert_eq!(args.port, 8080);
                assert_eq!(args.domain, "bulwark.dev");
                assert_eq!(args.issuer, "bulwark-auth");
                assert_eq!(args.access_ttl_seconds, 3600);
                assert_eq!(args.refresh_ttl_seconds, 86400);
                assert_eq!(args.logon_code_ttl_minutes, 5);
                assert_eq!(args.key_bits, 2048);
                assert!(args.google_client_id.is_none());
                assert_eq!(
                    args.allowed_origins,
                    vec![
                        "https://app.bulwark.dev".to_string(),
                        "http://localhost:5173".to_string()
                    ]
                );
            }
        });
    }

    #[test]
    fn blank_domain_is_rejected() {
        temp_env::with_vars(vars(&[("BULWARK_DOMAIN", Some(" "))]), || {
            let result = dispatch();
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err.to_string().contains("missing required argument: --domain"));
            }
        });
    }

    #[test]
    fn non_positive_lifetime_is_rejected() {
        temp_env::with_vars(vars(&[("BULWARK_LOGON_CODE_TTL", Some("0"))]), || {
            let result = dispatch();
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err.to_string().contains("--logon-code-ttl must be positive"));
            }
        });
    }

    #[test]
    fn oversized_lifetime_is_rejected() {
        temp_env::with_vars(
            vars(&[("BULWARK_LOGON_CODE_TTL", Some("9223372036854775807"))]),
            || {
                let result = dispatch();
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("--logon-code-ttl must be at most 1440"));
                }
            },
        );
        temp_env::with_vars(
            vars(&[("BULWARK_ACCESS_TOKEN_TTL", Some("9223372036854775807"))]),
            || assert!(dispatch().is_err()),
        );
    }

    #[test]
    fn weak_key_size_is_rejected() {
        temp_env::with_vars(vars(&[("BULWARK_KEY_BITS", Some("512"))]), || {
            let result = dispatch();
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(
                    err.to_string()
                        .contains("--key-bits must be between 2048 and 4096, got 512")
                );
            }
        });
        temp_env::with_vars(vars(&[("BULWARK_KEY_BITS", Some("4096"))]), || {
            assert!(dispatch().is_ok());
        });
    }
}
