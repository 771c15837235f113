use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use grammers_client::{
    types::{Chat, Downloadable, Media, Update},
    Client, Config, InitParams, SignInError,
};
use grammers_session::Session;

use crate::{
    settings::TelegramSettings,
    source::{ByteStream, DocumentSource, SourceError},
    types::{ChannelMeta, DocumentEvent, ExternalFileRef},
};

/// MTProto adapter. Holds an authorized client plus the resolved set of
/// subscribed channels; everything upstream of the trait speaks grammers,
/// everything downstream only sees `DocumentEvent`s.
pub struct TelegramSource {
    client: Client,
    channels: HashMap<i64, ChannelMeta>,
}

impl TelegramSource {
    /// Connects, runs the interactive first-time login when the session file
    /// holds no authorization, and resolves every configured channel. An
    /// identifier the session cannot access is an error, never skipped.
    pub async fn connect(settings: &TelegramSettings) -> Result<Self, SourceError> {
        let session = Session::load_file_or_create(&settings.session_path)
            .map_err(|err| SourceError::Other(format!("session file: {err}")))?;
        let client = Client::connect(Config {
            session,
            api_id: settings.api_id,
            api_hash: settings.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(|err| SourceError::Transient(format!("connect: {err}")))?;

        if !client
            .is_authorized()
            .await
            .map_err(classify_invocation)?
        {
            sign_in(&client, settings).await?;
        }
        client
            .session()
            .save_to_file(&settings.session_path)
            .map_err(|err| SourceError::Other(format!("saving session file: {err}")))?;

        let mut channels = HashMap::new();
        for identifier in &settings.channels {
            let chat = resolve_channel(&client, identifier).await?;
            tracing::info!(channel_id = chat.id(), title = chat.name(), "subscribed");
            channels.insert(
                chat.id(),
                ChannelMeta {
                    channel_id: chat.id(),
                    title: chat.name().to_string(),
                },
            );
        }

        Ok(Self { client, channels })
    }
}

#[async_trait]
impl DocumentSource for TelegramSource {
    type Handle = Media;

    async fn next_document(&self) -> Result<DocumentEvent<Media>, SourceError> {
        loop {
            let update = self
                .client
                .next_update()
                .await
                .map_err(classify_invocation)?;
            let Update::NewMessage(message) = update else {
                continue;
            };
            let Some(meta) = self.channels.get(&message.chat().id()) else {
                continue;
            };
            let Some(media) = message.media() else {
                continue;
            };
            let Media::Document(document) = &media else {
                continue;
            };

            let external_ref = ExternalFileRef {
                channel_id: meta.channel_id,
                message_id: message.id(),
                document_id: document.id(),
            };
            let filename = match document.name() {
                "" => format!("document-{}", document.id()),
                name => name.to_string(),
            };
            return Ok(DocumentEvent {
                external_ref,
                channel: meta.clone(),
                filename,
                size_bytes: document.size() as i64,
                handle: media,
            });
        }
    }

    async fn download(&self, handle: &Media) -> Result<ByteStream, SourceError> {
        let download = self
            .client
            .iter_download(&Downloadable::Media(handle.clone()));
        Ok(Box::pin(futures::stream::try_unfold(
            download,
            |mut download| async move {
                match download.next().await {
                    Ok(Some(chunk)) => Ok(Some((Bytes::from(chunk), download))),
                    Ok(None) => Ok(None),
                    Err(err) => Err(classify_invocation(err)),
                }
            },
        )))
    }
}

async fn sign_in(client: &Client, settings: &TelegramSettings) -> Result<(), SourceError> {
    let token = client
        .request_login_code(&settings.phone)
        .await
        .map_err(|err| SourceError::Auth(format!("requesting login code: {err}")))?;
    let code = prompt("Telegram login code: ").await?;
    match client.sign_in(&token, code.trim()).await {
        Ok(_) => Ok(()),
        Err(SignInError::PasswordRequired(password_token)) => {
            let password = settings.password.clone().ok_or_else(|| {
                SourceError::Auth("account requires a two-factor password".to_string())
            })?;
            client
                .check_password(password_token, password.trim())
                .await
                .map(|_| ())
                .map_err(|err| SourceError::Auth(format!("two-factor check: {err}")))
        }
        Err(err) => Err(SourceError::Auth(format!("sign in: {err}"))),
    }
}

async fn resolve_channel(client: &Client, identifier: &str) -> Result<Chat, SourceError> {
    if let Ok(channel_id) = identifier.parse::<i64>() {
        let mut dialogs = client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.map_err(classify_invocation)? {
            if dialog.chat().id() == channel_id {
                return Ok(dialog.chat().clone());
            }
        }
        return Err(SourceError::Other(format!(
            "channel {identifier} is not accessible from this session"
        )));
    }
    client
        .resolve_username(identifier.trim_start_matches('@'))
        .await
        .map_err(classify_invocation)?
        .ok_or_else(|| SourceError::Other(format!("channel {identifier} does not resolve")))
}

async fn prompt(message: &str) -> Result<String, SourceError> {
    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        print!("{message}");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok::<_, std::io::Error>(line)
    })
    .await
    .map_err(|err| SourceError::Other(format!("prompt task: {err}")))?
    .map_err(|err| SourceError::Other(format!("reading login code: {err}")))
}

fn classify_invocation(err: grammers_client::InvocationError) -> SourceError {
    use grammers_client::InvocationError;
    match &err {
        InvocationError::Rpc(rpc) => {
            let name = rpc.name.as_str();
            if name.starts_with("FLOOD") {
                SourceError::Transient(err.to_string())
            } else if name.starts_with("AUTH_") || name.starts_with("SESSION_") {
                SourceError::Auth(err.to_string())
            } else if name.starts_with("FILE_REFERENCE") {
                SourceError::Transient(err.to_string())
            } else if name.contains("FILE_ID") || name.contains("LOCATION_INVALID") {
                SourceError::NotFound(err.to_string())
            } else {
                SourceError::Other(err.to_string())
            }
        }
        // connection-level failures recover on their own
        _ => SourceError::Transient(err.to_string()),
    }
}
