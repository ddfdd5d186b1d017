use rand::seq::SliceRandom;

/// Common desktop user agents
const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Common viewport sizes
const VIEWPORTS: [(u32, u32); 4] = [(1920, 1080), (1366, 768), (1536, 864), (1440, 900)];

/// Client identity presented to a portal for one session.
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl FingerprintConfig {
    /// Generate a randomized fingerprint configuration
    pub fn randomized() -> Self {
        let mut rng = rand::thread_rng();
        let user_agent = USER_AGENTS.choose(&mut rng).unwrap_or(&USER_AGENTS[0]);
        let (width, height) = *VIEWPORTS.choose(&mut rng).unwrap_or(&VIEWPORTS[0]);

        Self {
            user_agent: (*user_agent).to_string(),
            accept_language: "es-PE,es;q=0.9,en;q=0.6".to_string(),
            viewport_width: width,
            viewport_height: height,
        }
    }

    /// Fixed user agent, randomized viewport.
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..Self::randomized()
        }
    }

    /// Randomized unless a fixed user agent is configured.
    pub fn from_config(user_agent: Option<&str>) -> Self {
        match user_agent {
            Some(ua) if !ua.trim().is_empty() => Self::with_user_agent(ua.trim()),
            _ => Self::randomized(),
        }
    }
}
