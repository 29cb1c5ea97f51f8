/// Default config file name (looked up in the working directory)
pub const CONFIG_FILE: &str = "capdex.json";

/// Default journal file name
pub const DEFAULT_JOURNAL_FILE: &str = "processed_files.json";

/// Default directory for log files
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default monitored directory
pub const DEFAULT_MONITOR_DIR: &str = "images";

/// Image extensions picked up by default
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Default Ollama host
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";

/// Default captioning model (vision capable)
pub const DEFAULT_CAPTION_MODEL: &str = "llava:13b";

/// Default captioning prompt
pub const DEFAULT_CAPTION_PROMPT: &str = "Describe this image in detail: \
the main subject and scene, colours, shapes and textures, the likely place, \
time and surroundings, and the overall mood. Answer in accurate, natural prose.";

/// Sampling temperature sent to the captioning model
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Maximum tokens the captioning model may generate
pub const DEFAULT_MAX_TOKENS: u32 = 600;

/// Captions of this many characters or fewer are rejected
pub const DEFAULT_MIN_DESCRIPTION_LEN: usize = 30;

/// Default knowledge base base URL
pub const DEFAULT_INGEST_BASE_URL: &str = "http://localhost";

/// Default knowledge base API prefix
pub const DEFAULT_INGEST_API_PREFIX: &str = "/v1";

/// Default indexing technique for uploaded documents
pub const DEFAULT_INDEXING_TECHNIQUE: &str = "high_quality";

/// Environment variable overriding the knowledge base API key
pub const API_KEY_ENV: &str = "CAPDEX_INGEST_API_KEY";

/// Attempts per external call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Fixed delay between attempts (seconds)
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Captioning request timeout (seconds)
pub const DEFAULT_CAPTION_TIMEOUT_SECS: u64 = 120;

/// Upload request timeout (seconds)
pub const DEFAULT_INGEST_TIMEOUT_SECS: u64 = 30;

/// Delay before handling a watched file, so writers can finish (seconds)
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 2;

/// Characters of the description kept in a journal entry
pub const DESCRIPTION_EXCERPT_LEN: usize = 100;

/// Characters of an error body kept for diagnostics
pub const ERROR_BODY_EXCERPT_LEN: usize = 200;
