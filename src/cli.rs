use clap::{Parser, Subcommand};

/// SeferEt workflow service — request approvals and notification fan-out
#[derive(Parser)]
#[command(name = "seferet", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the workflow server
    Serve {
        /// Port to bind (overrides SEFERET_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect and resolve workflow requests
    Request {
        #[command(subcommand)]
        command: RequestCommands,
    },

    /// Inspect notifications
    Notification {
        #[command(subcommand)]
        command: NotificationCommands,
    },
}

#[derive(Subcommand)]
pub enum RequestCommands {
    /// List requests, optionally filtered
    List {
        /// Filter by status: draft, pending, approved, rejected, expired, withdrawn
        #[arg(long)]
        status: Option<String>,
        /// Filter by kind: service_request, featured_request, ad
        #[arg(long)]
        kind: Option<String>,
    },
    /// Show one request
    Show { request_id: String },
    /// Approve a pending request (acts as the ops admin)
    Approve {
        request_id: String,
        /// Optional reviewer notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reject a pending request (acts as the ops admin)
    Reject {
        request_id: String,
        /// Reason shown to the owner (required)
        #[arg(long)]
        reason: String,
    },
}

#[derive(Subcommand)]
pub enum NotificationCommands {
    /// List notifications for a recipient ("kind:uuid")
    List {
        #[arg(long)]
        recipient: String,
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Show the unread count for a recipient ("kind:uuid")
    Unread {
        #[arg(long)]
        recipient: String,
    },
    /// List mail deliveries parked after retry exhaustion
    DeadLetters {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}
