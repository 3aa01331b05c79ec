use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    #[default]
    Full,
    Summary,
    Translated,
}

impl std::str::FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "summary" => Ok(Self::Summary),
            "translated" => Ok(Self::Translated),
            other => Err(format!("unknown playback mode: {}", other)),
        }
    }
}

/// Snapshot handed from the presentation layer to the playback engine.
///
/// The engine speaks `text` exactly as given and never goes back to the store
/// for content of `article_id` once it holds this command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackCommand {
    pub playlist: Vec<i64>,
    pub index: usize,
    pub mode: PlaybackMode,
    pub text: String,
    pub language: String,
    pub article_id: i64,
    pub title: String,
    pub feed_title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_survives_serialization() {
        let command = PlaybackCommand {
            playlist: vec![3, 7, 9],
            index: 1,
            mode: PlaybackMode::Translated,
            text: "Hola.--####--Adios.".to_string(),
            language: "es".to_string(),
            article_id: 7,
            title: "Noticias".to_string(),
            feed_title: None,
        };

        let json = serde_json::to_string(&command).unwrap();
        assert!(json.contains("\"mode\":\"translated\""));
        let decoded: PlaybackCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Summary".parse::<PlaybackMode>(), Ok(PlaybackMode::Summary));
        assert!("podcast".parse::<PlaybackMode>().is_err());
    }
}
