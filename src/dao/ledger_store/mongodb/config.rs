use mongodb::options::{Acknowledgment, ClientOptions, ReadConcern, WriteConcern};

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE: &str = "lyric_duel";
const APP_NAME: &str = "lyric-duel-back";

/// Connection settings for the MongoDB ledger backend.
#[derive(Clone)]
pub struct MongoConfig {
    /// Driver options with the ledger's read and write concerns applied.
    pub options: ClientOptions,
    /// Database holding accounts, ledger, matches and prompts.
    pub database_name: String,
}

impl MongoConfig {
    /// Parse `uri` and apply the ledger's durability settings.
    pub async fn from_uri(uri: &str, database_name: Option<&str>) -> MongoResult<Self> {
        let mut options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;
        apply_ledger_concerns(&mut options);

        Ok(Self {
            options,
            database_name: database_name.unwrap_or(DEFAULT_DATABASE).to_owned(),
        })
    }

    /// Read `MONGO_URI` (required) and `MONGO_DB` (optional).
    pub async fn from_env() -> MongoResult<Self> {
        let uri = std::env::var("MONGO_URI")
            .map_err(|_| MongoDaoError::MissingEnvVar { var: "MONGO_URI" })?;
        let database_name = std::env::var("MONGO_DB").ok();
        Self::from_uri(&uri, database_name.as_deref()).await
    }
}

/// Balance writes are acknowledged only once journaled on a majority, and reads only see
/// majority-committed data, whatever the URI asks for.
fn apply_ledger_concerns(options: &mut ClientOptions) {
    options.app_name.get_or_insert_with(|| APP_NAME.to_owned());
    options.write_concern = Some(
        WriteConcern::builder()
            .w(Acknowledgment::Majority)
            .journal(true)
            .build(),
    );
    options.read_concern = Some(ReadConcern::majority());
}

#[cfg(test)]
mod tests {
    use mongodb::options::ReadConcernLevel;

    use super::*;

    #[test]
    fn ledger_concerns_override_weaker_settings() {
        let mut options = ClientOptions::default();
        options.write_concern = Some(WriteConcern::builder().w(Acknowledgment::Nodes(1)).build());

        apply_ledger_concerns(&mut options);

        let write = options.write_concern.unwrap();
        assert_eq!(write.w, Some(Acknowledgment::Majority));
        assert_eq!(write.journal, Some(true));
        assert!(matches!(
            options.read_concern.map(|read| read.level),
            Some(ReadConcernLevel::Majority)
        ));
        assert_eq!(options.app_name.as_deref(), Some(APP_NAME));
    }

    #[test]
    fn explicit_app_name_is_kept() {
        let mut options = ClientOptions::default();
        options.app_name = Some("ops-console".into());

        apply_ledger_concerns(&mut options);

        assert_eq!(options.app_name.as_deref(), Some("ops-console"));
    }
}
