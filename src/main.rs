use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use chatdesk::config::Config;
use chatdesk::providers::WebhookResponder;
use chatdesk::services::{
    AccountService, AuthProvider, ChatService, GoTrueAuth, MemoryAuth, RemoteStore, RestStore,
    SqliteStore,
};
use chatdesk::store::{ChatStore, NoticeLevel, SendOutcome, StoreEvent};
use chatdesk::ui::chat_view::render_thread;
use chatdesk::ui::{InputArea, RenameDraft, SidebarItem, SidebarView};

const HELP: &str = "\
Commands:
  /login <email> <password>
  /signup <name> <email> <password> <confirm>
  /reset <email>                      send a password reset link
  /recover <link> <password> <confirm>
  /list                               show conversations
  /new                                start a conversation
  /open <n>                           open conversation number n
  /rename <n> <title>
  /delete <n>
  /show                               print the open conversation
  /logout
  /quit
Anything else is sent to the open conversation.";

struct Backend {
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    gotrue: Option<Arc<GoTrueAuth>>,
}

fn backend(config: &Config, timeout: Duration) -> Result<Backend> {
    match config.backend_url.as_deref().filter(|_| !config.is_offline()) {
        Some(url) => {
            tracing::info!("Using hosted backend at {}", url);
            let gotrue = Arc::new(GoTrueAuth::new(url, &config.anon_key, timeout)?);
            let auth: Arc<dyn AuthProvider> = gotrue.clone();
            let remote = RestStore::new(url, &config.anon_key, auth.clone(), timeout)?;
            Ok(Backend {
                remote: Arc::new(remote),
                auth,
                gotrue: Some(gotrue),
            })
        }
        None => {
            tracing::info!("No backend configured, running offline");
            let remote = SqliteStore::open_default().context("Failed to open local database")?;
            Ok(Backend {
                remote: Arc::new(remote),
                auth: Arc::new(MemoryAuth::new()),
                gotrue: None,
            })
        }
    }
}

struct Cli {
    store: ChatStore,
    accounts: AccountService,
    gotrue: Option<Arc<GoTrueAuth>>,
    input: InputArea,
    /// False when no webhook is configured.
    can_reply: bool,
}

impl Cli {
    fn print_sidebar(&self) {
        let state = self.store.snapshot();
        let view = SidebarView::from_state(&state, &Local::now());
        if view.items.is_empty() {
            println!("No conversations yet. Use /new to start one.");
            return;
        }
        let mut n = 0;
        for item in &view.items {
            match item {
                SidebarItem::Header(label) => println!("-- {} --", label),
                SidebarItem::Conversation {
                    conversation,
                    active,
                } => {
                    n += 1;
                    let marker = if *active { "*" } else { " " };
                    println!("{}{:>3}. {}", marker, n, conversation.title);
                }
            }
        }
    }

    fn print_thread(&self) {
        for line in render_thread(&self.store.snapshot()) {
            println!("{}", line);
        }
    }

    /// Conversation id for a 1-based sidebar position.
    fn nth_conversation(&self, arg: &str) -> Result<chatdesk::models::Conversation> {
        let n: usize = arg.trim().parse().context("Expected a conversation number")?;
        let state = self.store.snapshot();
        let view = SidebarView::from_state(&state, &Local::now());
        let found = n
            .checked_sub(1)
            .and_then(|i| view.conversations().nth(i).cloned());
        match found {
            Some(conversation) => Ok(conversation),
            None => bail!("No conversation number {}", n),
        }
    }

    async fn signed_in(&self) {
        self.store.load_conversations().await;
        self.print_sidebar();
    }

    async fn handle(&mut self, line: &str) -> Result<bool> {
        let line = line.trim();
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        match cmd {
            "" => {}
            "/help" => println!("{}", HELP),
            "/quit" | "/exit" => return Ok(false),
            "/login" => {
                let [email, password] = args[..] else {
                    bail!("Usage: /login <email> <password>");
                };
                let user = self.accounts.sign_in(email, password).await?;
                println!("Welcome, {}", user.name);
                self.signed_in().await;
            }
            "/signup" => {
                let [name, email, password, confirm] = args[..] else {
                    bail!("Usage: /signup <name> <email> <password> <confirm>");
                };
                match self.accounts.sign_up(name, email, password, confirm).await? {
                    Some(user) => {
                        println!("Account created. Welcome, {}", user.name);
                        self.signed_in().await;
                    }
                    None => println!("Check your email to confirm your account."),
                }
            }
            "/reset" => {
                let [email] = args[..] else {
                    bail!("Usage: /reset <email>");
                };
                self.accounts.request_password_reset(email).await?;
                println!("If that account exists, a reset link is on its way.");
            }
            "/recover" => {
                let [link, password, confirm] = args[..] else {
                    bail!("Usage: /recover <link> <password> <confirm>");
                };
                let Some(gotrue) = &self.gotrue else {
                    bail!("Recovery links need a hosted backend");
                };
                gotrue.restore_from_link(link).await?;
                self.accounts.reset_password(password, confirm).await?;
                println!("Password updated.");
                self.signed_in().await;
            }
            "/list" => {
                self.store.load_conversations().await;
                self.print_sidebar();
            }
            "/new" => {
                if self.store.create_conversation().await.is_some() {
                    self.print_thread();
                }
            }
            "/open" => {
                let conversation = self.nth_conversation(rest)?;
                if self.store.select_conversation(&conversation.id).await {
                    self.print_thread();
                }
            }
            "/rename" => {
                let Some((n, title)) = rest.split_once(char::is_whitespace) else {
                    bail!("Usage: /rename <n> <title>");
                };
                let conversation = self.nth_conversation(n)?;
                let mut draft = RenameDraft::begin(&conversation);
                draft.text = title.to_string();
                if let Some(title) = draft.commit() {
                    self.store.rename_conversation(&conversation.id, &title).await;
                }
            }
            "/delete" => {
                let conversation = self.nth_conversation(rest)?;
                self.store.delete_conversation(&conversation.id).await;
            }
            "/show" => self.print_thread(),
            "/logout" => {
                self.store.logout().await;
                println!("Signed out.");
            }
            _ if cmd.starts_with('/') => bail!("Unknown command {} (try /help)", cmd),
            _ => self.send(line).await,
        }
        Ok(true)
    }

    async fn send(&mut self, line: &str) {
        if !self.can_reply {
            println!("Sending needs a webhook; set CHATDESK_WEBHOOK_URL and restart.");
            return;
        }
        let state = self.store.snapshot();
        if state.active_conversation_id.is_none() {
            println!("{}", InputArea::placeholder(&state));
            return;
        }
        self.input.set_text(line);
        let Some(text) = self.input.submit(&state) else {
            return;
        };

        println!("assistant is typing...");
        if self.store.send_message(&text).await == SendOutcome::Delivered {
            if let Some(reply) = self.store.snapshot().messages.last() {
                println!("assistant: {}", reply.content);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    let timeout = Duration::from_secs(config.request_timeout_secs);

    let responder = match config.webhook_url.as_deref() {
        Some(url) => WebhookResponder::new(url, timeout)?,
        None => {
            tracing::warn!("No webhook URL configured; sending is disabled");
            WebhookResponder::disabled(timeout)?
        }
    };
    let can_reply = responder.is_configured();

    let Backend {
        remote,
        auth,
        gotrue,
    } = backend(&config, timeout)?;
    let chat = ChatService::new(remote.clone(), Arc::new(responder)).with_history_limit(config.history_limit);
    let store = ChatStore::new(remote, chat, auth.clone());

    let _notices = store.subscribe(|event| {
        if let StoreEvent::Notice(notice) = event {
            match notice.level {
                NoticeLevel::Success => println!("[ok] {}", notice.text),
                NoticeLevel::Error => println!("[error] {}", notice.text),
            }
        }
    });
    let _session = store.bind_auth().await;

    let mut cli = Cli {
        accounts: AccountService::new(auth, &config.site_url),
        store,
        gotrue,
        input: InputArea::new(),
        can_reply,
    };

    if cli.store.snapshot().user.is_some() {
        cli.signed_in().await;
    } else {
        println!("Not signed in. Use /login or /signup (/help for all commands).");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match cli.handle(&line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("[error] {:#}", e),
        }
    }

    cli.store.wait_idle().await;
    Ok(())
}
