//! CLI command definitions and dispatch.

use std::io::{self, Write};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use sowhereto_core::auth::token::{time_until_expiry, token_expiry};
use sowhereto_core::models::RegisterRequest;
use sowhereto_core::{ApiRequest, AuthError, Config, User};

use crate::app::App;

/// Environment variable supplying the sign-in email
const ENV_EMAIL: &str = "SOWHERETO_EMAIL";
/// Environment variable supplying the password (skips the prompt)
const ENV_PASSWORD: &str = "SOWHERETO_PASSWORD";

/// So Where To? - mystery travel from the terminal
#[derive(Debug, Parser)]
#[command(name = "sowhereto", version, about, long_about = None)]
pub struct Cli {
    /// Backend base address (overrides config and SOWHERETO_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sign in
    Login {
        #[arg(short, long, env = ENV_EMAIL)]
        email: Option<String>,
        /// Keep the session after this process exits
        #[arg(short, long)]
        remember: bool,
    },
    /// Create an account (the session is always kept)
    Register {
        #[arg(short, long, env = ENV_EMAIL)]
        email: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        /// Places never to be sent to
        #[arg(long, value_delimiter = ',')]
        blacklist: Vec<String>,
    },
    /// Sign out and forget stored credentials
    Logout,
    /// Show the stored session without contacting the backend
    Status,
    /// Show the signed-in user, re-read from the backend
    Whoami,
    /// Exchange the refresh token for a new access token
    Refresh,
    /// Run a route through the navigation guard
    Visit { path: String },
    /// Make an authenticated request and print the response body
    Request {
        method: String,
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Update profile fields
    Profile {
        /// Field to change, as key=value (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE", required = true)]
        set: Vec<String>,
    },
    /// Replace the list of places never to be sent to
    Blacklist { places: Vec<String> },
    /// Change the password of the signed-in user
    ChangePassword,
    /// Request a password reset email
    ForgotPassword {
        #[arg(env = ENV_EMAIL)]
        email: String,
    },
    /// Set a new password with the token from a reset email
    ResetPassword { token: String },
    /// Confirm an email address with the token from the verification email
    VerifyEmail { token: String },
}

impl Cli {
    pub async fn execute(&self, config: Config) -> Result<()> {
        let app = App::new(config)?;
        let result = run(&self.command, &app).await;
        app.shutdown().await;
        result
    }
}

async fn run(command: &Commands, app: &App) -> Result<()> {
    match command {
        Commands::Login { email, remember } => login(app, email.as_deref(), *remember).await,
        Commands::Register {
            email,
            first_name,
            last_name,
            blacklist,
        } => {
            let email = resolve_email(app, email.as_deref())?;
            let password = read_password("Choose a password: ")?;
            let request = RegisterRequest {
                email: email.clone(),
                password,
                first_name: first_name.clone(),
                last_name: last_name.clone(),
                blacklist: blacklist.clone(),
                ..Default::default()
            };
            let record = app.session.register(&request).await.map_err(describe)?;
            remember_email(app, &email);
            println!("Welcome, {}!", display_name(&record.user));
            Ok(())
        }
        Commands::Logout => {
            app.session.logout().await;
            println!("Signed out.");
            Ok(())
        }
        Commands::Status => {
            status(app);
            Ok(())
        }
        Commands::Whoami => match app.client.restore_session().await.map_err(describe)? {
            Some(user) => {
                print_json(&user)?;
                Ok(())
            }
            None => bail!("Not signed in"),
        },
        Commands::Refresh => {
            let token = app.session.refresh().await.map_err(describe)?;
            match token_expiry(&token) {
                Some(expiry) => println!("Token refreshed, valid until {}", expiry.with_timezone(&Local)),
                None => println!("Token refreshed"),
            }
            Ok(())
        }
        Commands::Visit { path } => {
            let transition = app.guard.navigate(path)?;
            if let Some(ref from) = transition.redirected_from {
                println!("{} -> {}", from, transition.location);
            } else {
                println!("{}", transition.location);
            }
            println!("route: {}", transition.route);
            for (key, value) in &transition.params {
                println!("  {} = {}", key, value);
            }
            Ok(())
        }
        Commands::Request { method, path, body } => {
            let method = method
                .to_uppercase()
                .parse()
                .map_err(|_| anyhow!("Unknown HTTP method: {}", method))?;
            let mut request = ApiRequest::new(method, path.as_str());
            if let Some(ref body) = body {
                let value: Value = serde_json::from_str(body).context("--body is not valid JSON")?;
                request = request.json(&value)?;
            }
            let response = app.client.send(request).await?;
            match serde_json::from_str::<Value>(&response.body) {
                Ok(json) => print_json(&json)?,
                Err(_) => println!("{}", response.body),
            }
            Ok(())
        }
        Commands::Profile { set } => {
            let patch = parse_assignments(set)?;
            let user = app.client.update_profile(&patch).await.map_err(describe)?;
            print_json(&user)?;
            Ok(())
        }
        Commands::Blacklist { places } => {
            let user = app.client.update_blacklist(places).await.map_err(describe)?;
            if user.blacklist.is_empty() {
                println!("Blacklist cleared.");
            } else {
                println!("Never sending you to: {}", user.blacklist.join(", "));
            }
            Ok(())
        }
        Commands::ChangePassword => {
            // always prompted, SOWHERETO_PASSWORD would supply both
            let current = rpassword::prompt_password("Current password: ")?;
            let new = rpassword::prompt_password("New password: ")?;
            if new.is_empty() {
                bail!("Password is required");
            }
            app.client.change_password(&current, &new).await.map_err(describe)?;
            println!("Password changed.");
            Ok(())
        }
        Commands::ForgotPassword { email } => {
            let message = app.client.forgot_password(email).await.map_err(describe)?;
            println!("{}", message.unwrap_or_else(|| "Check your inbox for a reset link.".to_string()));
            Ok(())
        }
        Commands::ResetPassword { token } => {
            let password = read_password("New password: ")?;
            let message = app.client.reset_password(token, &password).await.map_err(describe)?;
            println!("{}", message.unwrap_or_else(|| "Password reset.".to_string()));
            Ok(())
        }
        Commands::VerifyEmail { token } => {
            let message = app.client.verify_email(token).await.map_err(describe)?;
            println!("{}", message.unwrap_or_else(|| "Email verified.".to_string()));
            Ok(())
        }
    }
}

async fn login(app: &App, email: Option<&str>, remember: bool) -> Result<()> {
    let email = resolve_email(app, email)?;
    let password = read_password("Password: ")?;

    let record = app
        .session
        .login(&email, &password, remember)
        .await
        .map_err(describe)?;
    remember_email(app, &email);

    println!("Signed in as {}.", display_name(&record.user));
    if !remember {
        println!("Session kept for this run only (use --remember to stay signed in).");
    }
    println!("Continue at {}", app.guard.take_post_login_destination());
    Ok(())
}

fn status(app: &App) {
    let Some(token) = app.session.token() else {
        println!("Not signed in.");
        println!("Remember me: {}", app.session.remember_preference());
        return;
    };

    let state = if app.session.is_authenticated() {
        "signed in"
    } else {
        "token expired"
    };
    println!("Session:     {}", state);
    if let Some(user) = app.session.current_user() {
        println!("User:        {} ({})", display_name(&user), user.id);
    }
    println!("Stored in:   {:?}", app.session.persistence());
    println!("Remember me: {}", app.session.remember_preference());
    match token_expiry(&token) {
        Some(expiry) => println!(
            "Expires:     {} ({})",
            expiry.with_timezone(&Local),
            time_until_expiry(&token).map(format_remaining).unwrap_or_default()
        ),
        None => println!("Expires:     unknown"),
    }
    if app.session.needs_refresh() {
        println!("The access token expires soon; run `sowhereto refresh`.");
    }
    println!(
        "Refresh:     {}",
        if app.session.refresh_token().is_some() { "available" } else { "none" }
    );
}

fn resolve_email(app: &App, email: Option<&str>) -> Result<String> {
    if let Some(email) = email.filter(|e| !e.trim().is_empty()) {
        return Ok(email.trim().to_string());
    }

    match app.config.last_email {
        Some(ref last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    if !input.is_empty() {
        return Ok(input.to_string());
    }
    app.config
        .last_email
        .clone()
        .ok_or_else(|| anyhow!("Email is required"))
}

fn read_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        if !password.is_empty() {
            return Ok(password);
        }
    }
    let password = rpassword::prompt_password(prompt)?;
    if password.is_empty() {
        bail!("Password is required");
    }
    Ok(password)
}

/// Persist the email for the next prompt. Failure only costs convenience.
fn remember_email(app: &App, email: &str) {
    if app.config.last_email.as_deref() == Some(email) {
        return;
    }
    if let Err(e) = Config::save_last_email(email) {
        tracing::warn!(error = %e, "Failed to save config");
    }
}

fn format_remaining(remaining: chrono::Duration) -> String {
    let minutes = remaining.num_minutes();
    match minutes {
        0 => "less than a minute left".to_string(),
        m if m < 60 => format!("{}m left", m),
        m => format!("{}h {}m left", m / 60, m % 60),
    }
}

fn display_name(user: &User) -> String {
    let name = user.full_name();
    if name.is_empty() {
        user.id.to_string()
    } else {
        name
    }
}

/// `key=value` pairs into a JSON object. Values that parse as JSON keep
/// their type, anything else is a string.
fn parse_assignments(assignments: &[String]) -> Result<Map<String, Value>> {
    let mut patch = Map::new();
    for assignment in assignments {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'", assignment))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("Empty field name in '{}'", assignment);
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        patch.insert(key.to_string(), value);
    }
    Ok(patch)
}

/// Session errors with their field-level details
fn describe(error: AuthError) -> anyhow::Error {
    if error.errors.is_empty() {
        return anyhow!(error);
    }
    let details: Vec<String> = error
        .errors
        .iter()
        .map(|(field, messages)| format!("  {}: {}", field, messages.join(", ")))
        .collect();
    anyhow!("{}\n{}", error, details.join("\n"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
