//! Admin dashboard subcommands.

use std::io::Write;

use aquasense_core::model::Role;

use crate::dashboard::AdminDashboard;
use crate::fmt;
use crate::user_cmd::{self, Context, UserAction};

/// Admin dashboard actions.
#[derive(clap::Subcommand, Debug)]
pub enum AdminAction {
    /// List registered users.
    Users {
        /// Only users with this role.
        #[arg(short, long)]
        role: Option<Role>,
    },
    /// Every pond with its latest reading.
    Fleet,
    /// Open another user's pond.
    Pond {
        /// Owner of the pond.
        uid: String,
        #[command(subcommand)]
        action: UserAction,
    },
}

/// Execute an admin dashboard action.
pub async fn run(
    admin: &AdminDashboard,
    action: AdminAction,
    ctx: &Context,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match action {
        AdminAction::Users { role } => {
            let users = admin.list_users(role).await?;
            fmt::write_users(out, &users)?;
        }
        AdminAction::Fleet => {
            let rows = admin.fleet_summary().await?;
            fmt::write_fleet(out, &rows, ctx.offset_secs)?;
        }
        AdminAction::Pond { uid, action } => {
            let pond = admin.pond(&uid).await?;
            user_cmd::run(&pond, action, ctx, out).await?;
        }
    }
    Ok(())
}
