use regex::Regex;

/// Line printed by the engine after a snapshot was written
pub const SNAPSHOT_SAVED: &str = r"snapshot ([0-9a-zA-Z]+) saved";
/// Line printed by the engine after a snapshot was forgotten
pub const SNAPSHOT_REMOVED: &str = r"removed snapshot ([0-9a-zA-Z]+)";

/// Extracts the snapshot id an engine run reports on its standard output.
///
/// Operations only depend on this trait, a machine readable engine output
/// would just need another implementation.
pub trait ConfirmationParser: Send + Sync {
    fn extract_snapshot_id(&self, output: &str) -> Option<String>;
}

pub struct PatternParser {
    pattern: Regex
}

impl PatternParser {
    /// The pattern needs exactly one capture group which holds the id
    pub fn new(pattern: &str) -> Result<PatternParser, String> {
        let regex = Regex::new(pattern)
            .map_err(|err| format!("Invalid confirmation pattern '{}' ({})", pattern, err))?;

        // captures_len includes the implicit group for the whole match
        if regex.captures_len() != 2 {
            return Err(format!("Confirmation pattern '{}' needs exactly one capture group", pattern));
        }

        return Ok(PatternParser { pattern: regex });
    }
}

impl ConfirmationParser for PatternParser {
    fn extract_snapshot_id(&self, output: &str) -> Option<String> {
        self.pattern
            .captures(output)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
    }
}

/// The parsers used by the backup and remove operations
pub struct ResultParsers {
    pub created: Box<dyn ConfirmationParser>,
    pub removed: Box<dyn ConfirmationParser>
}

impl ResultParsers {
    pub fn standard() -> Result<ResultParsers, String> {
        Ok(ResultParsers {
            created: Box::new(PatternParser::new(SNAPSHOT_SAVED)?),
            removed: Box::new(PatternParser::new(SNAPSHOT_REMOVED)?)
        })
    }
}
