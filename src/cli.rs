use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "paycat", about = "PayCat — multi-tenant subscription and entitlement gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default if no subcommand is given)
    Serve,
    /// Manage tenant apps
    Apps {
        #[command(subcommand)]
        command: AppsCommands,
    },
    /// Manage a tenant's outbound webhooks
    Webhooks {
        #[command(subcommand)]
        command: WebhooksCommands,
    },
}

#[derive(Subcommand)]
pub enum AppsCommands {
    /// Create a new tenant app and print its API key
    Create { name: String },
    /// Show an app's id, name, and configured providers
    Show { app_id: String },
}

#[derive(Subcommand)]
pub enum WebhooksCommands {
    /// Register a webhook endpoint for an app
    Add { app_id: String, url: String },
}

pub async fn handle_apps(command: AppsCommands, config: &crate::config::Config) -> anyhow::Result<()> {
    let pool = crate::db::initialize_db(&config.database_url).await?;

    match command {
        AppsCommands::Create { name } => {
            let app = crate::db::models::App::new(name);
            app.create(&pool).await?;
            println!("created app {}\tapi_key={}", app.id, app.api_key);
        }
        AppsCommands::Show { app_id } => match crate::db::models::App::find_by_id(&app_id, &pool).await? {
            Some(app) => {
                println!("{}\t{}\tapi_key={}", app.id, app.name, app.api_key);
                println!(
                    "apple={}\tgoogle={}\tstripe={}\tpaddle={}\tamazon={}",
                    app.apple_config.is_some(),
                    app.google_config.is_some(),
                    app.stripe_config.is_some(),
                    app.paddle_config.is_some(),
                    app.amazon_config.is_some(),
                );
            }
            None => println!("no such app: {app_id}"),
        },
    }

    Ok(())
}

pub async fn handle_webhooks(command: WebhooksCommands, config: &crate::config::Config) -> anyhow::Result<()> {
    let pool = crate::db::initialize_db(&config.database_url).await?;

    match command {
        WebhooksCommands::Add { app_id, url } => {
            if crate::db::models::App::find_by_id(&app_id, &pool).await?.is_none() {
                anyhow::bail!("no such app: {app_id}");
            }
            let webhook = crate::db::models::Webhook::new(app_id, url);
            webhook.create(&pool).await?;
            println!("created webhook {}\tsecret={}", webhook.id, webhook.secret);
        }
    }

    Ok(())
}
