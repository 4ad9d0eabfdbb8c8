//! # Account Subcommands
//!
//! `create-admin` bootstraps the first administrator; `set-role` changes an
//! existing account's role or active flag.

use anyhow::{bail, Context, Result};
use clap::Args;

use umeed_api::auth::Role;
use umeed_api::orchestration::{self, NewUser};
use umeed_api::AppState;
use umeed_core::{EmailAddress, PhoneNumber};

use crate::find_user;

/// Arguments for `umeed create-admin`.
#[derive(Args, Debug)]
pub struct CreateAdminArgs {
    #[arg(long, default_value = "admin")]
    pub username: String,

    #[arg(long, default_value = "admin@nayiumeed.com")]
    pub email: String,

    /// Must be unique across accounts.
    #[arg(long)]
    pub phone: String,

    #[arg(long, env = "UMEED_ADMIN_PASSWORD", hide_env_values = true)]
    pub password: String,

    #[arg(long, default_value = "")]
    pub first_name: String,

    #[arg(long, default_value = "")]
    pub last_name: String,
}

/// Create a verified staff admin. An existing account with the same
/// username is promoted instead and reactivated.
pub async fn run_create_admin(args: &CreateAdminArgs, state: &AppState) -> Result<u8> {
    if let Ok(existing) = find_user(state, &args.username) {
        let user = orchestration::update_user(state, None, existing.id, Some(Role::Admin), Some(true))
            .await
            .context("promoting existing user")?;
        tracing::info!(user_id = %user.id, "promoted existing user to admin");
        println!("Updated '{}' to admin ({})", user.username, user.id);
        return Ok(0);
    }

    if args.password.len() < 8 {
        bail!("password must be at least 8 characters");
    }
    let input = NewUser {
        username: args.username.clone(),
        email: EmailAddress::new(args.email.as_str())?,
        phone_number: PhoneNumber::new(args.phone.as_str())?,
        first_name: args.first_name.clone(),
        last_name: args.last_name.clone(),
        role: Role::Admin,
        password: args.password.clone(),
        otp_verified: true,
        is_staff: true,
    };
    let user = orchestration::create_user(state, input)
        .await
        .context("creating admin")?;
    println!("Created admin '{}' ({})", user.username, user.id);
    Ok(0)
}

/// Arguments for `umeed set-role`.
#[derive(Args, Debug)]
pub struct SetRoleArgs {
    pub username: String,

    /// donor, buyer, both, repair_partner, or admin.
    #[arg(long)]
    pub role: Option<String>,

    /// Activate (`true`) or deactivate (`false`) the account.
    #[arg(long)]
    pub active: Option<bool>,
}

pub async fn run_set_role(args: &SetRoleArgs, state: &AppState) -> Result<u8> {
    if args.role.is_none() && args.active.is_none() {
        bail!("nothing to change: pass --role and/or --active");
    }
    let role = match args.role.as_deref() {
        Some(name) => Some(
            Role::from_name(name).with_context(|| format!("unknown role '{name}'"))?,
        ),
        None => None,
    };

    let user = find_user(state, &args.username)?;
    let user = orchestration::update_user(state, None, user.id, role, args.active).await?;
    println!(
        "{}: role={} active={}",
        user.username, user.role, user.is_active
    );
    Ok(0)
}
