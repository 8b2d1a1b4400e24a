use crate::try_result;

use std::fs::File;
use std::io::BufReader;

use serde::Deserialize;
use std::path::Path;

pub fn from_file<T>(file_name: &Path) -> Result<T, String> where for<'de> T: Deserialize<'de> {
    let file = try_result!(File::open(file_name), format!("Could not open file '{}' for reading", file_name.display()));
    let buf_reader = BufReader::new(file);

    let result: Result<T,_> = serde_json::from_reader(buf_reader);
    return result.map_err(|err| format!("Failed reading the file '{}' ({})", file_name.display(), err));
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        threads: usize
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "worker"}}"#).unwrap();

        let sample = from_file::<Sample>(file.path()).unwrap();
        assert_eq!(sample.name, "worker");
        assert_eq!(sample.threads, 0);
    }

    #[test]
    fn reports_path_on_failure() {
        let err = from_file::<Sample>(Path::new("/nonexistent/config.json")).err().unwrap();
        assert!(err.contains("/nonexistent/config.json"));
    }

    #[test]
    fn rejects_wrong_shape() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"threads": 2}}"#).unwrap();
        assert!(from_file::<Sample>(file.path()).is_err());
    }
}
