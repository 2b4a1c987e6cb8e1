//! Auth command handlers.

use anyhow::Result;
use dropdrive_core::auth::{ConsolePrompt, LoopbackAuthorizer, SystemBrowser};
use dropdrive_core::config::Settings;
use dropdrive_core::oauth::{DropboxFlow, IncludeGrantedScopes};
use dropdrive_core::secrets::{FileSecretStore, access_token_name, mask_token};

pub async fn login(
    drive: &str,
    scopes: &[String],
    include_granted_scopes: IncludeGrantedScopes,
) -> Result<()> {
    let settings = Settings::load_default()?;
    let secrets = FileSecretStore::open_default()?;
    let secrets_path = secrets.path().to_path_buf();

    let mut authorizer = LoopbackAuthorizer::new(
        DropboxFlow::new(),
        Box::new(secrets),
        settings,
        Box::new(ConsolePrompt),
        Box::new(SystemBrowser::from_env()),
    );

    match authorizer
        .obtain_access_token(scopes, include_granted_scopes, drive)
        .await
    {
        Some(token) => {
            println!();
            println!(
                "✓ Drive '{drive}' is authorized (token: {})",
                mask_token(&token)
            );
            println!("  Credentials saved to: {}", secrets_path.display());
            Ok(())
        }
        None => anyhow::bail!("Authorization did not complete; no access token was obtained"),
    }
}

pub fn logout(drive: &str) -> Result<()> {
    let mut secrets = FileSecretStore::open_default()?;
    let had_creds = secrets.clear_drive(drive)?;

    if had_creds {
        println!("✓ Logged out drive '{drive}'");
        println!("  Credentials removed from: {}", secrets.path().display());
    } else {
        println!("Drive '{drive}' is not logged in (no credentials found).");
    }

    Ok(())
}

pub fn status(drive: &str) -> Result<()> {
    use dropdrive_core::secrets::SecretStore;

    let secrets = FileSecretStore::open_default()?;
    match secrets.read_secret(&access_token_name(drive)) {
        Some(token) if !token.is_empty() => {
            println!("Drive '{drive}' is authorized (token: {})", mask_token(&token));
        }
        _ => println!("Drive '{drive}' is not authorized."),
    }

    Ok(())
}
