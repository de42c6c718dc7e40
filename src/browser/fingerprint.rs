//! Randomized browser fingerprints.

use rand::seq::SliceRandom;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/123.0.0.0 Safari/537.36",
];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768)];

const LOCALES: &[&str] = &["en-US", "en-GB", "en-CA"];

const TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Chicago",
    "America/Los_Angeles",
    "Europe/London",
];

/// One coherent identity a browsing context presents to sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub locale: String,
    pub timezone: String,
}

impl Fingerprint {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            user_agent: USER_AGENTS
                .choose(&mut rng)
                .copied()
                .unwrap_or(USER_AGENTS[0])
                .to_string(),
            viewport: VIEWPORTS.choose(&mut rng).copied().unwrap_or(VIEWPORTS[0]),
            locale: LOCALES.choose(&mut rng).copied().unwrap_or(LOCALES[0]).to_string(),
            timezone: TIMEZONES
                .choose(&mut rng)
                .copied()
                .unwrap_or(TIMEZONES[0])
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_fingerprints_draw_from_the_pools() {
        let fp = Fingerprint::random();
        assert!(USER_AGENTS.contains(&fp.user_agent.as_str()));
        assert!(VIEWPORTS.contains(&fp.viewport));
        assert!(TIMEZONES.contains(&fp.timezone.as_str()));
    }
}
