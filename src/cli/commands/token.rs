use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{generate_jwt, Claims};
use crate::cli::OutputFormat;
use crate::database::models::user::ROLE_USER;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Sign a development JWT with the local JWT_SECRET")]
    Mint {
        #[arg(long, help = "Organization id")]
        org: Uuid,
        #[arg(long, help = "User id")]
        user: Uuid,
        #[arg(long, default_value = "cli", help = "Username claim")]
        username: String,
        #[arg(long = "role", help = "Role claim, repeatable (default ROLE_USER)")]
        roles: Vec<String>,
    },
}

pub fn mint(org: Uuid, user: Uuid, username: &str, mut roles: Vec<String>) -> anyhow::Result<String> {
    if roles.is_empty() {
        roles.push(ROLE_USER.to_string());
    }
    let claims = Claims::new(user, org, username, roles);
    Ok(generate_jwt(&claims)?)
}

pub fn handle(cmd: TokenCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Mint {
            org,
            user,
            username,
            roles,
        } => {
            let token = mint(org, user, &username, roles)?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&json!({ "token": token }))?),
                OutputFormat::Text => println!("{}", token),
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::decode_jwt;

    #[test]
    fn minted_token_defaults_to_user_role() {
        let org = Uuid::new_v4();
        let token = mint(org, Uuid::new_v4(), "cli", vec![]).unwrap();
        let claims = decode_jwt(&token).unwrap();
        assert_eq!(claims.org, org);
        assert_eq!(claims.roles, vec![ROLE_USER.to_string()]);
    }
}
