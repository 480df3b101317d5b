//! Interactive shell over a [`SessionAuthority`]: sign-in flows, profile
//! edits and navigation through the guarded route table.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::future::{BoxFuture, FutureExt};
use rustyline::error::ReadlineError;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::error::AuthResult;
use crate::identity::{
    FederatedFailure, FederatedFlow, FederatedOutcome, Identity, IdpCredential, LocalIdentityProvider, ProviderError,
    SessionAuthority,
};
use crate::routes::{dashboard_menu, dashboard_title, from_login_url, Navigation, Navigator};

/// How long the shell waits for a sign-in to be reflected in the session.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

pub fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--backend <url>] [--recheck <secs>]\n\nFlags:\n  --backend <url>    Backend base URL (default: HOMENEST_BACKEND_URL or http://localhost:3000)\n  --recheck <secs>   Re-check the administrator role periodically\n  -h, --help         Show this help\n\nInteractive commands:\n  signup <email> <password> [display name]   create an account and sign in\n  login <email> <password>                   sign in with email and password\n  google [email]                             federated sign-in\n  logout                                     sign out\n  profile <name> [avatar-url]                update display name and avatar\n  whoami                                     show the current session\n  go <path>                                  navigate to a page\n  menu                                       show the dashboard menu\n  help                                       show this help\n  quit | exit                                leave the shell\n\nEnvironment:\n  HOMENEST_IDENTITY_API_KEY selects the identity REST API; without it accounts live in memory."
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SignUp { email: String, password: String, display_name: Option<String> },
    Login { email: String, password: String },
    Google { email: Option<String> },
    Logout,
    Profile { name: String, avatar: Option<String> },
    WhoAmI,
    Go(String),
    Menu,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else { return Command::Empty };
    let args: Vec<&str> = parts.collect();
    match head.to_ascii_lowercase().as_str() {
        "signup" => match args.as_slice() {
            [email, password, name @ ..] => Command::SignUp {
                email: email.to_string(),
                password: password.to_string(),
                display_name: if name.is_empty() { None } else { Some(name.join(" ")) },
            },
            _ => Command::Invalid("usage: signup <email> <password> [display name]".into()),
        },
        "login" => match args.as_slice() {
            [email, password] => Command::Login { email: email.to_string(), password: password.to_string() },
            _ => Command::Invalid("usage: login <email> <password>".into()),
        },
        "google" => Command::Google { email: args.first().map(|s| s.to_string()) },
        "logout" => Command::Logout,
        "profile" => {
            // A trailing http(s) URL is the avatar; everything before it is the name.
            let (name, avatar) = match args.split_last() {
                Some((last, rest)) if last.starts_with("http://") || last.starts_with("https://") => {
                    (rest.join(" "), Some(last.to_string()))
                }
                _ => (args.join(" "), None),
            };
            if name.is_empty() && avatar.is_none() {
                Command::Invalid("usage: profile <name> [avatar-url]".into())
            } else {
                Command::Profile { name, avatar }
            }
        }
        "whoami" | "status" => Command::WhoAmI,
        "go" => match args.as_slice() {
            [path] => Command::Go(path.to_string()),
            _ => Command::Invalid("usage: go <path>".into()),
        },
        "menu" => Command::Menu,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Invalid(format!("unknown command '{}'; type 'help'", other)),
    }
}

/// Which identity provider backs the shell.
pub enum ProviderMode {
    /// In-memory accounts; `google <email>` scripts the federated result.
    Local(Arc<LocalIdentityProvider>),
    /// Identity REST API; federated sign-in reads a pasted ID token.
    Remote,
}

/// Federated flow for terminals: asks the user to paste a Google ID token.
/// An empty line cancels.
pub struct PromptFederatedFlow;

impl FederatedFlow for PromptFederatedFlow {
    fn obtain_credential(&self) -> BoxFuture<'_, Result<IdpCredential, ProviderError>> {
        async move {
            let line = tokio::task::spawn_blocking(|| -> io::Result<String> {
                print!("Paste a Google ID token (empty to cancel): ");
                io::stdout().flush()?;
                let mut line = String::new();
                io::stdin().lock().read_line(&mut line)?;
                Ok(line)
            })
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
            let token = line.trim();
            if token.is_empty() {
                return Err(ProviderError::Federated(FederatedFailure::Cancelled));
            }
            Ok(IdpCredential { provider_id: "google.com".to_string(), id_token: token.to_string() })
        }
        .boxed()
    }
}

pub struct Repl<'rt> {
    rt: &'rt Runtime,
    navigator: Navigator,
    mode: ProviderMode,
    /// Location a guard bounced us from, restored after sign-in.
    pending_from: Option<String>,
}

impl<'rt> Repl<'rt> {
    pub fn new(rt: &'rt Runtime, navigator: Navigator, mode: ProviderMode) -> Self {
        Self { rt, navigator, mode, pending_from: None }
    }

    fn authority(&self) -> &SessionAuthority { self.navigator.authority() }

    pub fn run(&mut self) -> Result<()> {
        let mut rl = rustyline::DefaultEditor::new()?;
        println!("homenest shell. Type 'help' for commands.");
        loop {
            let line = match rl.readline("homenest> ") {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            };
            let command = parse_command(&line);
            if !matches!(command, Command::Empty) {
                let _ = rl.add_history_entry(line.as_str());
            }
            if !self.dispatch(command) {
                break;
            }
        }
        Ok(())
    }

    /// Execute one command; `false` ends the shell.
    pub fn dispatch(&mut self, command: Command) -> bool {
        match command {
            Command::Quit => return false,
            Command::Empty => {}
            Command::Help => print_usage("homenest"),
            Command::Invalid(msg) => eprintln!("{}", msg),
            Command::SignUp { email, password, display_name } => {
                let outcome = self.rt.block_on(self.authority().create_account(&email, &password, display_name.as_deref(), None));
                self.after_sign_in(outcome);
            }
            Command::Login { email, password } => {
                let outcome = self.rt.block_on(self.authority().sign_in_with_credential(&email, &password));
                self.after_sign_in(outcome);
            }
            Command::Google { email } => {
                if let ProviderMode::Local(provider) = &self.mode {
                    let outcome = match email {
                        Some(email) => FederatedOutcome::SignedIn { email, display_name: None, photo_url: None },
                        None => FederatedOutcome::Cancelled,
                    };
                    provider.queue_federated(outcome);
                }
                let outcome = self.rt.block_on(self.authority().sign_in_with_federated_provider());
                self.after_sign_in(outcome);
            }
            Command::Logout => match self.rt.block_on(self.authority().sign_out()) {
                Ok(()) => {
                    let state = self.rt.block_on(self.settle(|s| !s.is_signed_in()));
                    if !state.is_signed_in() {
                        println!("Logged out successfully");
                    }
                }
                Err(e) => eprintln!("error: {}", e.user_message()),
            },
            Command::Profile { name, avatar } => {
                // Without a URL the current avatar is kept.
                let avatar = avatar
                    .or_else(|| self.authority().current_capability().identity.and_then(|i| i.photo_url))
                    .unwrap_or_default();
                match self.rt.block_on(self.authority().update_display_profile(&name, &avatar)) {
                    Ok(identity) => {
                        self.rt.block_on(self.settle(|s| s.identity.as_ref() == Some(&identity)));
                        println!("Profile updated: {}", identity.display_label());
                    }
                    Err(e) => eprintln!("error: {}", e.user_message()),
                }
            }
            Command::WhoAmI => self.print_session(),
            Command::Go(path) => self.go(&path),
            Command::Menu => {
                let state = self.authority().current_capability();
                if !state.is_signed_in() {
                    println!("Sign in to see the dashboard.");
                } else {
                    let role = state.effective_role();
                    println!("{}", dashboard_title(role));
                    for item in dashboard_menu(role) {
                        println!("  {:<20} {}", item.label, item.path);
                    }
                }
            }
        }
        true
    }

    fn after_sign_in(&mut self, outcome: AuthResult<Identity>) {
        let identity = match outcome {
            Ok(identity) => identity,
            Err(e) => {
                debug!(target: "session", code = e.code_str(), "sign-in failed in shell");
                eprintln!("error: {}", e.user_message());
                return;
            }
        };
        let uid = identity.uid.clone();
        let state = self.rt.block_on(self.settle(|s| s.uid() == Some(uid.as_str())));
        println!("Welcome, {}! ({})", identity.display_label(), state.effective_role());
        let target = self.navigator.return_path(self.pending_from.take().as_deref());
        self.go(&target);
    }

    async fn settle<F>(&self, pred: F) -> crate::identity::SessionState
    where
        F: FnMut(&crate::identity::SessionState) -> bool,
    {
        match tokio::time::timeout(SETTLE_TIMEOUT, self.authority().wait_until(pred)).await {
            Ok(state) => state,
            Err(_) => self.authority().current_capability(),
        }
    }

    fn go(&mut self, path: &str) {
        match self.navigator.navigate(path) {
            Navigation::Render { route, path } => println!("[{}] {}", route, path),
            Navigation::Loading { path } => println!("{}: loading session...", path),
            Navigation::Redirect { to } => {
                self.pending_from = from_login_url(&to);
                println!("Please sign in first ({})", to);
            }
            Navigation::AccessDenied { message, redirect_to } => {
                println!("{}", message);
                println!("-> {}", redirect_to);
            }
            Navigation::NotFound { path } => println!("404: no page at {}", path),
        }
    }

    fn print_session(&self) {
        let state = self.authority().current_capability();
        match (&state.identity, state.is_ready()) {
            (_, false) => println!("session: pending"),
            (None, true) => println!("session: signed out"),
            (Some(identity), true) => {
                println!("user:  {}", identity.display_label());
                if let Some(email) = &identity.email {
                    println!("email: {}", email);
                }
                if let Some(photo) = &identity.photo_url {
                    println!("photo: {}", photo);
                }
                println!("role:  {}", state.effective_role().label());
            }
        }
        println!("generation: {}", state.generation);
    }
}
