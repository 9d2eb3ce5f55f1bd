use std::io;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpStream, ToSocketAddrs, tcp::OwnedWriteHalf},
    select,
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{cli::ClientArgs, error::ClientError, protocol};

/// A connection to the relay from the client's side.
///
/// Every line the server sends is passed to the callback given to
/// [`ChatClient::connect`], on the client's reader task. Callers that render
/// somewhere else are expected to forward the line themselves.
pub struct ChatClient {
    writer: Mutex<OwnedWriteHalf>,
    reader_task: JoinHandle<io::Result<()>>,
}

impl ChatClient {
    /// Connects and sends `username` as the handshake line.
    pub async fn connect<A, F>(
        addr: A,
        username: &str,
        mut on_message: F,
    ) -> Result<Self, ClientError>
    where
        A: ToSocketAddrs,
        F: FnMut(String) + Send + 'static,
    {
        let username = username.trim();
        if username.is_empty() {
            return Err(ClientError::EmptyUsername);
        }

        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
        let (reader, mut writer) = stream.into_split();
        protocol::write_line(&mut writer, username).await?;

        let reader_task = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            while let Some(line) = protocol::read_line(&mut reader).await? {
                on_message(line);
            }
            Ok(())
        });

        Ok(Self {
            writer: Mutex::new(writer),
            reader_task,
        })
    }

    pub async fn send(&self, text: &str) -> Result<(), ClientError> {
        let mut writer = self.writer.lock().await;
        protocol::write_line(&mut *writer, text).await?;
        Ok(())
    }

    /// Half-closes the connection; the server treats this as leaving.
    pub async fn quit(&self) -> Result<(), ClientError> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.reader_task.is_finished()
    }

    /// Waits until the server side of the connection has gone away.
    pub async fn closed(self) -> Result<(), ClientError> {
        match self.reader_task.await {
            Ok(result) => result.map_err(ClientError::Io),
            Err(err) => Err(ClientError::Io(io::Error::other(err))),
        }
    }
}

/// Interactive terminal client: stdin lines go out, server lines are printed.
pub async fn run(args: ClientArgs) -> Result<()> {
    let (inbound_tx, mut inbound) = mpsc::unbounded_channel();
    let client = ChatClient::connect(args.server, &args.username, move |line| {
        let _ = inbound_tx.send(line);
    })
    .await
    .with_context(|| format!("failed to join chat at {}", args.server))?;

    info!("connected to {} as {}", args.server, args.username);

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            line = inbound.recv() => {
                match line {
                    Some(line) => write_stdout(&line).await?,
                    None => {
                        write_stdout("*** connection lost").await?;
                        break;
                    }
                }
            }
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read?, &input, &client).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    if let Err(error) = client.quit().await {
        debug!(?error, "failed to shut down connection cleanly");
    }

    Ok(())
}

async fn handle_stdin_input(bytes_read: usize, input: &str, client: &ChatClient) -> Result<bool> {
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    client.send(text).await?;
    Ok(true)
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
