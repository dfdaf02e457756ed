//! CLI definition using clap

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cf")]
#[command(version)]
#[command(about = "Cloud Foundry command line client")]
#[command(long_about = r#"
cf - Cloud Foundry command line client

Commands:
  api      show or set the targeted API endpoint
  auth     log in with a username/password or client credentials
  logout   forget the stored tokens and org/space
  target   show or set the targeted org and space
  orgs     list organizations
  spaces   list spaces in the targeted org
  curl     send a raw authenticated request to the API

State is kept in $CF_HOME/.cf/config.json (CF_HOME defaults to your home dir).
"#)]
#[command(after_help = r#"
Examples:

  Target an API and log in:
    cf api https://api.example.com
    cf auth admin secret

  Pick an org and space:
    cf target -o my-org -s dev

  Raw API access:
    cf curl /v2/apps
    cf curl /v3/spaces -X POST -d '{"name": "dev"}'
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Machine output (JSON lines)
    #[arg(long, global = true)]
    pub agent: bool,

    /// Show debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show or set the API endpoint
    #[command(after_help = "Examples:
  cf api
  cf api https://api.example.com
  cf api https://api.example.com --skip-ssl-validation
  cf api --unset")]
    Api {
        /// API endpoint URL (https:// is assumed when no scheme is given)
        url: Option<String>,

        /// Accept self-signed or otherwise invalid certificates
        #[arg(long)]
        skip_ssl_validation: bool,

        /// Remove the API endpoint and everything tied to it
        #[arg(long, conflicts_with = "url")]
        unset: bool,
    },

    /// Authenticate against UAA
    #[command(after_help = "Examples:
  cf auth admin secret
  cf auth my-client my-client-secret --client-credentials")]
    Auth {
        /// Username, or client id with --client-credentials
        username: String,

        /// Password, or client secret with --client-credentials
        #[arg(env = "CF_PASSWORD", hide_env_values = true)]
        password: String,

        /// Use the client_credentials grant
        #[arg(long)]
        client_credentials: bool,
    },

    /// Log out
    Logout,

    /// Show or set the targeted org and space
    #[command(after_help = "Examples:
  cf target
  cf target -o my-org
  cf target -o my-org -s dev")]
    Target {
        /// Organization name
        #[arg(short, long)]
        org: Option<String>,

        /// Space name
        #[arg(short, long)]
        space: Option<String>,
    },

    /// List organizations
    Orgs,

    /// List spaces in the targeted org
    Spaces,

    /// Send an authenticated request and print the response
    #[command(after_help = "Examples:
  cf curl /v2/info
  cf curl /v2/apps/GUID -X DELETE
  cf curl /Users --uaa")]
    Curl {
        /// Path (relative to the API endpoint) or absolute URL
        path: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request body (JSON)
        #[arg(short, long)]
        data: Option<String>,

        /// Send to the UAA endpoint instead of the Cloud Controller
        #[arg(long)]
        uaa: bool,
    },
}

impl Commands {
    /// Operation name used in error reports
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Api { .. } => "api",
            Commands::Auth { .. } => "auth",
            Commands::Logout => "logout",
            Commands::Target { .. } => "target",
            Commands::Orgs => "orgs",
            Commands::Spaces => "spaces",
            Commands::Curl { .. } => "curl",
        }
    }
}
