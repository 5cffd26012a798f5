use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(archive_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(base) = archive_home {
        return Some(base.join(".env"));
    }
    Some(home_dir?.join(".slack_archive/.env"))
}

/// `.env` from the working directory, else from the archive home.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("SLACK_ARCHIVE_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::fallback_dotenv_path;
    use std::path::PathBuf;

    #[test]
    fn archive_home_holds_the_fallback_env_file() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/srv/slack")),
            Some(PathBuf::from("/home/ada")),
        );
        assert_eq!(got, Some(PathBuf::from("/srv/slack/.env")));
    }

    #[test]
    fn default_home_is_used_when_archive_home_unset() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/ada")));
        assert_eq!(got, Some(PathBuf::from("/home/ada/.slack_archive/.env")));
        assert_eq!(fallback_dotenv_path(None, None), None);
    }
}
