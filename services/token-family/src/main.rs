//! Operator CLI for the token family service.

use anyhow::Context;
use clap::{Parser, Subcommand};
use rust_common::init_tracing;
use serde::Serialize;
use serde_json::json;
use std::process::ExitCode;
use std::sync::Arc;
use token_family_service::events::{FanoutEventSink, MemoryEventSink, TracingEventSink};
use token_family_service::refresh::reasons;
use token_family_service::{Config, TokenError, TokenFamilyService};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Issue, rotate, validate and revoke refresh token families",
    long_about = r#"Operator tool for refresh token families.

Configuration is read from the environment (and a .env file if present).
JWT_REFRESH_SECRET is required; REDIS_URL selects the shared store,
otherwise an in-process store is used for the lifetime of the command.

Every command prints a JSON document on stdout with the command result
and the security events it raised."#
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new family for a user (login)
    Issue {
        /// User identifier
        user_id: String,
    },
    /// Redeem a refresh token for the next one in its family
    Rotate {
        /// Refresh token to redeem
        token: String,
    },
    /// Validate a refresh token without redeeming it
    Validate {
        /// Refresh token to check
        token: String,
    },
    /// Revoke one family
    Revoke {
        /// Family identifier
        family_id: String,
        /// Owner of the family
        user_id: String,
        /// Reason recorded with the revocation
        #[arg(long, default_value = reasons::LOGOUT)]
        reason: String,
    },
    /// Revoke every family of a user
    RevokeUser {
        /// User identifier
        user_id: String,
        /// Reason recorded with each revocation
        #[arg(long, default_value = reasons::REVOKE_ALL)]
        reason: String,
    },
    /// Show whether a family is active or revoked
    Status {
        /// Family identifier
        family_id: String,
    },
}

impl Command {
    /// Subcommand name, safe to log.
    const fn name(&self) -> &'static str {
        match self {
            Self::Issue { .. } => "issue",
            Self::Rotate { .. } => "rotate",
            Self::Validate { .. } => "validate",
            Self::Revoke { .. } => "revoke",
            Self::RevokeUser { .. } => "revoke-user",
            Self::Status { .. } => "status",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing(&Config::tracing_from_env());
    let config = Config::from_env().context("Failed to load configuration")?;

    let recorded = Arc::new(MemoryEventSink::new());
    let sink = FanoutEventSink::new()
        .with_sink(Arc::new(TracingEventSink))
        .with_sink(recorded.clone());
    let service = TokenFamilyService::from_config(&config)
        .context("Failed to build token family service")?
        .with_event_sink(Arc::new(sink));
    info!(command = cli.command.name(), "Running command");

    let (result, succeeded) = match run(&service, cli.command).await {
        Ok(outcome) => outcome,
        Err(err) => (
            json!({
                "error": {
                    "code": err.code(),
                    "message": err.to_string(),
                    "storeUnavailable": err.is_store_unavailable(),
                }
            }),
            false,
        ),
    };

    print_json(&json!({
        "result": result,
        "securityEvents": recorded.events().await,
    }))?;

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(
    service: &TokenFamilyService,
    command: Command,
) -> Result<(serde_json::Value, bool), TokenError> {
    let outcome = match command {
        Command::Issue { user_id } => {
            let issued = service.create_new_family(&user_id).await?;
            (serde_json::to_value(&issued)?, true)
        }
        Command::Rotate { token } => match service.rotate_token(&token).await {
            Some(issued) => (serde_json::to_value(&issued)?, true),
            None => (json!({ "rotated": false }), false),
        },
        Command::Validate { token } => {
            let result = service.validate_token(&token).await;
            let valid = result.valid;
            (serde_json::to_value(&result)?, valid)
        }
        Command::Revoke {
            family_id,
            user_id,
            reason,
        } => {
            service.revoke_family(&family_id, &user_id, &reason).await;
            let revocation = service.revocation(&family_id).await?;
            let revoked = revocation.is_some();
            (
                json!({ "familyId": family_id, "revocation": revocation }),
                revoked,
            )
        }
        Command::RevokeUser { user_id, reason } => {
            let revoked = service.revoke_all_user_families(&user_id, &reason).await?;
            (json!({ "userId": user_id, "familiesRevoked": revoked }), true)
        }
        Command::Status { family_id } => {
            let state = service.family_state(&family_id).await?;
            let revocation = service.revocation(&family_id).await?;
            (
                json!({ "familyId": family_id, "state": state, "revocation": revocation }),
                true,
            )
        }
    };
    Ok(outcome)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
