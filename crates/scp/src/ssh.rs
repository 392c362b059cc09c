//! SSH transport
//!
//! Uses russh for the connection. Authentication is by password, private key
//! file or ssh-agent; the server key is checked against a configured
//! fingerprint when one is given.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelMsg, Disconnect};

use afs_core::{Error, Result};

use crate::config::{AuthMethod, SshConfig};
use crate::transport::{Channel, CommandOutput, Transport};

/// Errors raised while negotiating the connection
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Ssh(#[from] russh::Error),

    #[error("server key mismatch: expected {expected}, server offered {actual}")]
    HostKeyMismatch { expected: String, actual: String },
}

/// Client handler for russh - handles server key verification
pub struct ClientHandler {
    expected: Option<String>,
}

fn same_fingerprint(expected: &str, actual: &str) -> bool {
    let strip = |f: &str| f.trim().trim_start_matches("SHA256:").to_string();
    strip(expected) == strip(actual)
}

impl client::Handler for ClientHandler {
    type Error = HandshakeError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let actual = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        match &self.expected {
            Some(expected) if same_fingerprint(expected, &actual) => Ok(true),
            Some(expected) => Err(HandshakeError::HostKeyMismatch {
                expected: expected.clone(),
                actual,
            }),
            None => {
                tracing::warn!(fingerprint = %actual, "accepting server key without verification");
                Ok(true)
            }
        }
    }
}

/// Authenticated SSH connection
pub struct SshTransport {
    handle: Handle<ClientHandler>,
    address: String,
}

impl SshTransport {
    /// Dial and authenticate, both bounded by `timeout`
    pub async fn connect(host: &str, port: u16, config: &SshConfig, timeout: Duration) -> Result<Self> {
        let address = format!("{host}:{port}");
        tokio::time::timeout(timeout, Self::establish(host, port, config, &address))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {address} exceeded {timeout:?}")))?
    }

    async fn establish(host: &str, port: u16, config: &SshConfig, address: &str) -> Result<Self> {
        let handler = ClientHandler {
            expected: config.fingerprint.clone(),
        };
        let mut handle = client::connect(Arc::new(client::Config::default()), (host, port), handler)
            .await
            .map_err(|e| Error::Connection(format!("failed to dial {address}: {e}")))?;

        if !authenticate(&mut handle, config).await? {
            return Err(Error::Connection(format!(
                "authentication rejected for {}@{address}",
                config.user
            )));
        }
        tracing::info!(address, user = %config.user, "connected");
        Ok(Self {
            handle,
            address: address.to_string(),
        })
    }

    /// Classify a channel failure: a dead connection must be rebuilt
    fn channel_error(&self, command: &str, err: russh::Error) -> Error {
        if self.handle.is_closed() {
            Error::Connection(format!("connection to {} lost: {err}", self.address))
        } else {
            Error::Session(format!("`{command}` on {}: {err}", self.address))
        }
    }

    async fn exec(&self, command: &str) -> Result<russh::Channel<client::Msg>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| self.channel_error(command, e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| self.channel_error(command, e))?;
        tracing::debug!(address = %self.address, command, "started remote command");
        Ok(channel)
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }
}

fn auth_error(err: impl std::fmt::Display) -> Error {
    Error::Connection(format!("authentication failed: {err}"))
}

async fn authenticate(handle: &mut Handle<ClientHandler>, config: &SshConfig) -> Result<bool> {
    let user = config.user.as_str();
    match &config.auth {
        AuthMethod::Password(password) => Ok(handle
            .authenticate_password(user, password)
            .await
            .map_err(auth_error)?
            .success()),
        AuthMethod::KeyFile { path, passphrase } => {
            let key = russh::keys::load_secret_key(path, passphrase.as_deref()).map_err(|e| {
                Error::Config(format!("failed to load key {}: {e}", path.display()))
            })?;
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            Ok(handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                .await
                .map_err(auth_error)?
                .success())
        }
        AuthMethod::Agent => authenticate_agent(handle, user).await,
    }
}

#[cfg(unix)]
async fn authenticate_agent(handle: &mut Handle<ClientHandler>, user: &str) -> Result<bool> {
    use russh::keys::agent::client::AgentClient;

    let mut agent = AgentClient::connect_env().await.map_err(auth_error)?;
    let keys = agent.request_identities().await.map_err(auth_error)?;
    for key in keys {
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        match handle
            .authenticate_publickey_with(user, key.clone(), hash_alg, &mut agent)
            .await
        {
            Ok(result) if result.success() => return Ok(true),
            Ok(_) => tracing::debug!(key = %key.fingerprint(HashAlg::Sha256), "agent key rejected"),
            Err(e) => tracing::warn!(error = %e, "agent authentication error"),
        }
    }
    Ok(false)
}

#[cfg(not(unix))]
async fn authenticate_agent(_: &mut Handle<ClientHandler>, _: &str) -> Result<bool> {
    Err(Error::Unsupported("ssh-agent authentication".into()))
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&self, command: &str) -> Result<Box<dyn Channel>> {
        let channel = self.exec(command).await?;
        Ok(Box::new(Box::pin(channel.into_stream())))
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let mut channel = self.exec(command).await?;
        let mut output = CommandOutput::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => output.stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => output.status = Some(exit_status),
                _ => {}
            }
        }
        tracing::debug!(address = %self.address, command, status = ?output.status, "remote command finished");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_fingerprint() {
        assert!(same_fingerprint("SHA256:abc", "SHA256:abc"));
        assert!(same_fingerprint("abc", "SHA256:abc"));
        assert!(!same_fingerprint("SHA256:abd", "SHA256:abc"));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = SshTransport::connect(
            "127.0.0.1",
            port,
            &SshConfig::password("u", "p"),
            Duration::from_secs(5),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }
}
