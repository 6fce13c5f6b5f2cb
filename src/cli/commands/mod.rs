pub mod email;
pub mod logging;
pub mod tokens;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_ALLOWED_ORIGINS: &str = "allowed-origins";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("bulwark")
        .about("Credential issuance and verification")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("BULWARK_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .env("BULWARK_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id; enables the google social provider")
                .env("BULWARK_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_ALLOWED_ORIGINS)
                .long(ARG_ALLOWED_ORIGINS)
                .help("Comma separated browser origins allowed by CORS")
                .env("BULWARK_ALLOWED_ORIGINS")
                .value_delimiter(','),
        );

    let command = tokens::with_args(command);
    let command = email::with_args(command);
    logging::with_args(command)
}
