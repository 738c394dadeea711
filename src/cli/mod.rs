//! CLI entry point for graphkit.

pub mod auth;

use clap::{Parser, Subcommand};

/// graphkit CLI
#[derive(Parser, Debug)]
#[command(name = "graphkit", version, about = "Microsoft Graph account tooling")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Account sign-in and listing
    Auth(AuthArgs),
}

/// Arguments for the `auth` subcommand group.
#[derive(Parser, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommands,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Sign in a new account with the device-code flow
    Login,
    /// List signed-in accounts
    List,
}
