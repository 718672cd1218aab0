//! Super-admin dashboard subcommands.

use std::io::Write;

use aquasense_core::model::Role;

use crate::admin_cmd::{self, AdminAction};
use crate::dashboard::SuperAdminDashboard;
use crate::fmt;
use crate::user_cmd::Context;

/// Super-admin dashboard actions.
#[derive(clap::Subcommand, Debug)]
pub enum SuperAction {
    /// Register an account for someone else.
    Register {
        uid: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "user")]
        role: Role,
    },
    /// Change an account's role.
    SetRole { uid: String, role: Role },
    /// Delete an account and all of its pond data.
    Delete {
        uid: String,
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Number of accounts per role.
    Counts,
    /// Everything the admin dashboard offers.
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

/// Execute a super-admin dashboard action.
pub async fn run(
    dash: &SuperAdminDashboard,
    action: SuperAction,
    ctx: &Context,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match action {
        SuperAction::Register {
            uid,
            name,
            email,
            role,
        } => {
            let profile = dash.register_user(&uid, &name, &email, role, ctx.now).await?;
            writeln!(out, "User registered.")?;
            fmt::write_profile(out, &profile, ctx.offset_secs)?;
        }
        SuperAction::SetRole { uid, role } => {
            let profile = dash.set_role(&uid, role).await?;
            writeln!(out, "{} is now {}.", profile.uid, profile.role)?;
        }
        SuperAction::Delete { uid, yes } => {
            if !yes {
                anyhow::bail!("deleting {uid} removes all of their data; pass --yes to confirm");
            }
            let removed = dash.delete_user(&uid).await?;
            writeln!(out, "Deleted {uid} ({removed} document(s)).")?;
        }
        SuperAction::Counts => {
            let counts = dash.role_counts().await?;
            fmt::write_role_counts(out, &counts)?;
        }
        SuperAction::Admin { action } => {
            admin_cmd::run(&dash.admin(), action, ctx, out).await?;
        }
    }
    Ok(())
}
