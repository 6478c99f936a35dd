use std::collections::HashSet;
use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{Entity, EntityKind, UserSubscription};
use crate::utils;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: Option<PathBuf>,
    pub users_path: PathBuf,
    pub venue_url_prefix: String,
    pub artist_url_prefix: String,
    pub promoter_url_prefix: String,
    pub event_url_prefix: String,
    pub fetch_concurrency: usize,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            users_path: PathBuf::from("users.json"),
            venue_url_prefix: "https://www.residentadvisor.net/club.aspx?id=".to_string(),
            artist_url_prefix: "https://www.residentadvisor.net/dj/".to_string(),
            promoter_url_prefix: "https://www.residentadvisor.net/promoter.aspx?id=".to_string(),
            event_url_prefix: "https://www.residentadvisor.net/events/".to_string(),
            fetch_concurrency: 4,
            smtp: SmtpConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("malformed config file {}", path.display()))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(utils::default_database_path)
    }
}

#[derive(Debug, Deserialize)]
struct UsersFile {
    users: Vec<UserSubscription>,
}

pub fn load_users(path: &Path) -> Result<Vec<UserSubscription>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("unable to read users file {}", path.display()))?;
    let parsed: UsersFile = serde_json::from_str(&contents)
        .with_context(|| format!("malformed users file {}", path.display()))?;
    Ok(parsed.users)
}

/// The entities a run polls: the distinct union of every user's venues,
/// artists and promoters, in first-seen order.
pub fn tracked_entities(users: &[UserSubscription]) -> Vec<Entity> {
    let mut seen: HashSet<(EntityKind, String)> = HashSet::new();
    let mut entities = Vec::new();

    for user in users {
        let groups = [
            (EntityKind::Venue, &user.venues),
            (EntityKind::Artist, &user.artists),
            (EntityKind::Promoter, &user.promoters),
        ];
        for (kind, interests) in groups {
            for interest in interests {
                if seen.insert((kind, interest.tag.clone())) {
                    entities.push(Entity {
                        name: interest.name.clone(),
                        tag: interest.tag.clone(),
                        kind,
                    });
                }
            }
        }
    }

    entities
}
