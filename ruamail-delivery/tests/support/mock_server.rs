//! Scriptable SMTP server for transport tests.
//!
//! Replies are configured per command verb; the server records every
//! command and message it receives, and counts connections so tests can
//! tell a reused session from a fresh one.
//!
//! ```rust,no_run
//! # async fn example() -> std::io::Result<()> {
//! let server = MockSmtpServer::builder()
//!     .with_reply("RCPT", 550, "User unknown")
//!     .build()
//!     .await?;
//!
//! // deliver to server.addr(), then inspect server.commands().await
//! # Ok(())
//! # }
//! ```
#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    task::JoinHandle,
};

/// A command as seen by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    StartTls,
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message lines between DATA and the final dot, still dot-stuffed
    Message(String),
    Rset,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    fn render(&self) -> String {
        format!("{} {}\r\n", self.code, self.text)
    }
}

#[derive(Debug, Clone)]
struct Script {
    greeting: Reply,
    capabilities: Vec<String>,
    replies: HashMap<String, Reply>,
    stall_on: Option<String>,
}

impl Script {
    fn reply(&self, verb: &str) -> Reply {
        self.replies.get(verb).cloned().unwrap_or_else(|| match verb {
            "DATA" => Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            "END" => Reply::new(250, "2.0.0 Ok: queued"),
            "AUTH" => Reply::new(235, "2.7.0 Authentication successful"),
            "QUIT" => Reply::new(221, "2.0.0 Bye"),
            "STARTTLS" => Reply::new(502, "5.5.1 Not implemented"),
            "MAIL" | "RCPT" | "RSET" | "HELO" => Reply::new(250, "2.0.0 Ok"),
            _ => Reply::new(500, "5.5.2 Unknown command"),
        })
    }

    fn ehlo(&self) -> String {
        let mut lines = vec!["mock.example".to_string()];
        lines.extend(self.capabilities.iter().cloned());

        let last = lines.len() - 1;
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let sep = if i == last { ' ' } else { '-' };
                format!("250{sep}{line}\r\n")
            })
            .collect()
    }
}

/// A running mock server
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::default()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// Messages received, in order
    pub async fn messages(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|command| match command {
                SmtpCommand::Message(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }

    async fn session(
        stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(script.greeting.render().as_bytes()).await?;

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            let input = line.trim_end().to_string();
            let (verb, argument) = input
                .split_once(' ')
                .map_or((input.as_str(), ""), |(verb, argument)| (verb, argument));
            let verb = verb.to_ascii_uppercase();

            if script.stall_on.as_deref() == Some(verb.as_str()) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            let command = match verb.as_str() {
                "EHLO" => SmtpCommand::Ehlo(argument.to_string()),
                "HELO" => SmtpCommand::Helo(argument.to_string()),
                "STARTTLS" => SmtpCommand::StartTls,
                "AUTH" => SmtpCommand::Auth(argument.to_string()),
                "MAIL" => SmtpCommand::MailFrom(argument.to_string()),
                "RCPT" => SmtpCommand::RcptTo(argument.to_string()),
                "DATA" => SmtpCommand::Data,
                "RSET" => SmtpCommand::Rset,
                "QUIT" => SmtpCommand::Quit,
                _ => SmtpCommand::Other(input.clone()),
            };
            commands.write().await.push(command);

            let response = match verb.as_str() {
                "EHLO" => script.ehlo(),
                other => script.reply(other).render(),
            };
            writer.write_all(response.as_bytes()).await?;

            match verb.as_str() {
                "QUIT" => return Ok(()),
                "DATA" if script.reply("DATA").code == 354 => {
                    let mut message = String::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line == ".\r\n" {
                            break;
                        }
                        message.push_str(&line);
                    }
                    commands.write().await.push(SmtpCommand::Message(message));
                    writer
                        .write_all(script.reply("END").render().as_bytes())
                        .await?;
                }
                _ => {}
            }
        }
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Configures a [`MockSmtpServer`]
#[derive(Debug, Default)]
pub struct MockSmtpServerBuilder {
    greeting: Option<(u16, String)>,
    capabilities: Vec<String>,
    replies: HashMap<String, Reply>,
    stall_on: Option<String>,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, text: impl Into<String>) -> Self {
        self.greeting = Some((code, text.into()));
        self
    }

    /// Extension keywords listed after the EHLO greeting line
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    /// Reply for a command verb; `END` is the reply to the final dot
    #[must_use]
    pub fn with_reply(mut self, verb: &str, code: u16, text: impl Into<String>) -> Self {
        self.replies
            .insert(verb.to_ascii_uppercase(), Reply::new(code, text));
        self
    }

    /// Never answer the given verb
    #[must_use]
    pub fn with_stall_on(mut self, verb: &str) -> Self {
        self.stall_on = Some(verb.to_ascii_uppercase());
        self
    }

    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (code, text) = self
            .greeting
            .unwrap_or_else(|| (220, "mock.example ESMTP".to_string()));
        let script = Arc::new(Script {
            greeting: Reply::new(code, text),
            capabilities: self.capabilities,
            replies: self.replies,
            stall_on: self.stall_on,
        });

        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let commands = Arc::clone(&commands);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let script = Arc::clone(&script);
                    let commands = Arc::clone(&commands);
                    tokio::spawn(async move {
                        let _ = MockSmtpServer::session(stream, script, commands).await;
                    });
                }
            })
        };

        Ok(MockSmtpServer {
            addr,
            commands,
            connections,
            task,
        })
    }
}
