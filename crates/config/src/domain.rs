//! Business catalog configuration
//!
//! Everything the agent knows about the company lives here: the housing
//! developments with their models and prices, the bank list for the
//! credit dialogue, business hours and map links. Loaded from
//! `config/domain.yaml`; the built-in default carries the full catalog
//! so the agent works out of the box.

use serde::{Deserialize, Serialize};
use std::path::Path;

use sales_agent_core::text::normalize;

use crate::ConfigError;

/// Canonical value stored when the customer has no bank preference.
pub const UNDECIDED_BANK: &str = "Por definir";

/// Placeholder property used before a development is known.
pub const UNDECIDED_PROPERTY: &str = "Por definir";

/// Business catalog loaded from domain.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub company: CompanyInfo,
    #[serde(default = "default_developments")]
    pub developments: Vec<DevelopmentConfig>,
    #[serde(default = "default_banks")]
    pub banks: Vec<BankEntry>,
    #[serde(default)]
    pub business_hours: BusinessHours,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            company: CompanyInfo::default(),
            developments: default_developments(),
            banks: default_banks(),
            business_hours: BusinessHours::default(),
        }
    }
}

/// Company identity used in greetings and notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub name: String,
    pub city: String,
    pub state: String,
    /// Name the agent introduces itself with
    pub agent_name: String,
}

impl Default for CompanyInfo {
    fn default() -> Self {
        Self {
            name: "Grupo Santa Rita".to_string(),
            city: "Guadalupe".to_string(),
            state: "Zacatecas".to_string(),
            agent_name: "Sara".to_string(),
        }
    }
}

/// One housing development
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevelopmentConfig {
    /// Stable key used in storage and logs
    pub key: String,
    /// Display name
    pub name: String,
    /// Extra words that identify this development in free text
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub models: Vec<PropertyModel>,
    /// Explicit price span for developments without itemized models
    #[serde(default)]
    pub price_range: Option<PriceRange>,
    /// Google Maps link sent with appointment notifications
    #[serde(default)]
    pub maps_url: Option<String>,
    /// Brochure or gallery link sent on media requests
    #[serde(default)]
    pub brochure_url: Option<String>,
}

impl DevelopmentConfig {
    /// Lowest and highest price on offer, from models or the explicit range.
    pub fn price_span(&self) -> Option<(i64, i64)> {
        if let Some(range) = &self.price_range {
            return Some((range.min, range.max));
        }
        let min = self.models.iter().map(|m| m.price).min()?;
        let max = self.models.iter().map(|m| m.price).max()?;
        Some((min, max))
    }

    fn matches(&self, norm_text: &str) -> bool {
        if norm_text.contains(&normalize(&self.name)) {
            return true;
        }
        self.aliases.iter().any(|a| norm_text.contains(&normalize(a)))
    }
}

/// One house model within a development
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyModel {
    pub name: String,
    /// Price in pesos
    pub price: i64,
    #[serde(default)]
    pub bedrooms: Option<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: i64,
    pub max: i64,
}

/// A bank the credit dialogue can offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Visiting hours; appointments outside these get a polite pushback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHours {
    /// Opening hour, 24h
    pub open: u32,
    /// Monday-Friday closing hour, 24h
    pub close: u32,
    /// Saturday closing hour, 24h
    pub saturday_close: u32,
    /// Whether Sunday visits are accepted
    pub sunday_open: bool,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            open: 9,
            close: 18,
            saturday_close: 14,
            sunday_open: false,
        }
    }
}

impl BusinessHours {
    /// Closing hour for a weekday, `None` when closed all day.
    pub fn closing_hour(&self, weekday: chrono::Weekday) -> Option<u32> {
        match weekday {
            chrono::Weekday::Sun if !self.sunday_open => None,
            chrono::Weekday::Sun => Some(self.saturday_close),
            chrono::Weekday::Sat => Some(self.saturday_close),
            _ => Some(self.close),
        }
    }

    pub fn is_open(&self, weekday: chrono::Weekday, hour: u32) -> bool {
        match self.closing_hour(weekday) {
            Some(close) => hour >= self.open && hour < close,
            None => false,
        }
    }
}

impl DomainConfig {
    /// Load from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|_| ConfigError::FileNotFound(path.as_ref().display().to_string()))?;
        let config: Self =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// An empty catalog would leave the agent with nothing to sell.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.developments.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "developments".to_string(),
                message: "At least one development is required".to_string(),
            });
        }
        if self.banks.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "banks".to_string(),
                message: "At least one bank is required".to_string(),
            });
        }
        Ok(())
    }

    /// First development mentioned in free text.
    pub fn find_development(&self, text: &str) -> Option<&DevelopmentConfig> {
        let norm = normalize(text);
        self.developments.iter().find(|d| d.matches(&norm))
    }

    pub fn development_by_key(&self, key: &str) -> Option<&DevelopmentConfig> {
        self.developments.iter().find(|d| d.key == key)
    }

    pub fn development_names(&self) -> Vec<&str> {
        self.developments.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn bank_names(&self) -> Vec<&str> {
        self.banks.iter().map(|b| b.name.as_str()).collect()
    }

    /// Resolve a bank mention to its canonical name. "No sé" and its
    /// cousins resolve to [`UNDECIDED_BANK`]; unrelated text is `None`.
    pub fn detect_bank(&self, text: &str) -> Option<String> {
        let norm = normalize(text);
        for bank in &self.banks {
            if norm.contains(&normalize(&bank.name)) {
                return Some(bank.name.clone());
            }
            for alias in &bank.aliases {
                if norm.contains(&normalize(alias)) {
                    return Some(bank.name.clone());
                }
            }
        }
        const UNDECIDED: [&str; 6] = ["no se", "cualquier", "recomiend", "no tengo", "ninguno", "el que sea"];
        if UNDECIDED.iter().any(|u| norm.contains(u)) {
            return Some(UNDECIDED_BANK.to_string());
        }
        None
    }

    /// Models across the catalog priced at or under a budget, cheapest
    /// first. Used for "tengo X pesos" recommendations.
    pub fn models_within_budget(&self, budget: i64) -> Vec<(&DevelopmentConfig, &PropertyModel)> {
        let mut matches: Vec<(&DevelopmentConfig, &PropertyModel)> = self
            .developments
            .iter()
            .flat_map(|d| d.models.iter().map(move |m| (d, m)))
            .filter(|(_, m)| m.price <= budget)
            .collect();
        matches.sort_by_key(|(_, m)| m.price);
        matches
    }
}

fn maps_link(query: &str) -> Option<String> {
    Some(format!("https://maps.google.com/?q={query}"))
}

fn default_developments() -> Vec<DevelopmentConfig> {
    vec![
        DevelopmentConfig {
            key: "monte_verde".to_string(),
            name: "Monte Verde".to_string(),
            aliases: vec!["monteverde".to_string()],
            description: "Casas de 2 y 3 recámaras al norte de la ciudad".to_string(),
            models: vec![
                PropertyModel { name: "Acacia".to_string(), price: 1_600_000, bedrooms: Some(2) },
                PropertyModel { name: "Eucalipto".to_string(), price: 1_700_000, bedrooms: Some(2) },
                PropertyModel { name: "Olivo".to_string(), price: 2_100_000, bedrooms: Some(3) },
                PropertyModel { name: "Fresno".to_string(), price: 2_300_000, bedrooms: Some(3) },
                PropertyModel { name: "Fresno 2".to_string(), price: 2_800_000, bedrooms: Some(3) },
            ],
            price_range: None,
            maps_url: maps_link("Monte+Verde+Guadalupe+Zacatecas"),
            brochure_url: None,
        },
        DevelopmentConfig {
            key: "los_encinos".to_string(),
            name: "Los Encinos".to_string(),
            aliases: vec!["encinos".to_string()],
            description: "Residencial de 3 recámaras con áreas verdes".to_string(),
            models: vec![
                PropertyModel { name: "Encino Blanco".to_string(), price: 3_000_000, bedrooms: Some(3) },
                PropertyModel { name: "Encino Verde".to_string(), price: 3_000_000, bedrooms: Some(3) },
                PropertyModel { name: "Encino Dorado".to_string(), price: 3_200_000, bedrooms: Some(3) },
                PropertyModel { name: "Roble".to_string(), price: 3_300_000, bedrooms: Some(3) },
                PropertyModel { name: "Maple".to_string(), price: 3_400_000, bedrooms: Some(3) },
                PropertyModel { name: "Nogal".to_string(), price: 3_600_000, bedrooms: Some(3) },
                PropertyModel { name: "Sabino".to_string(), price: 3_800_000, bedrooms: Some(3) },
            ],
            price_range: None,
            maps_url: maps_link("Los+Encinos+Guadalupe+Zacatecas"),
            brochure_url: None,
        },
        DevelopmentConfig {
            key: "distrito_falco".to_string(),
            name: "Distrito Falco".to_string(),
            aliases: vec!["falco".to_string()],
            description: "Residencial premium, casas amplias de lujo".to_string(),
            models: vec![
                PropertyModel { name: "Mirlo".to_string(), price: 5_000_000, bedrooms: Some(3) },
                PropertyModel { name: "Calandria".to_string(), price: 5_400_000, bedrooms: Some(4) },
            ],
            price_range: Some(PriceRange { min: 3_700_000, max: 5_400_000 }),
            maps_url: maps_link("Distrito+Falco+Zacatecas"),
            brochure_url: None,
        },
        DevelopmentConfig {
            key: "miravalle".to_string(),
            name: "Miravalle".to_string(),
            aliases: vec![],
            description: "Residencial con vista al valle".to_string(),
            models: vec![],
            price_range: Some(PriceRange { min: 3_100_000, max: 4_400_000 }),
            maps_url: maps_link("Miravalle+Zacatecas"),
            brochure_url: None,
        },
        DevelopmentConfig {
            key: "privada_andes".to_string(),
            name: "Privada Andes".to_string(),
            aliases: vec!["andes".to_string()],
            description: "Privada con casas desde 2 recámaras".to_string(),
            models: vec![
                PropertyModel { name: "Laurel".to_string(), price: 1_600_000, bedrooms: Some(2) },
                PropertyModel { name: "Dalia".to_string(), price: 1_900_000, bedrooms: Some(2) },
                PropertyModel { name: "Gardenia".to_string(), price: 2_500_000, bedrooms: Some(3) },
                PropertyModel { name: "Lavanda".to_string(), price: 2_800_000, bedrooms: Some(3) },
            ],
            price_range: None,
            maps_url: maps_link("Privada+Andes+Guadalupe+Zacatecas"),
            brochure_url: None,
        },
        DevelopmentConfig {
            key: "alpes".to_string(),
            name: "Alpes".to_string(),
            aliases: vec![],
            description: "Privada familiar".to_string(),
            models: vec![
                PropertyModel { name: "Dalia Alpes".to_string(), price: 2_000_000, bedrooms: Some(2) },
            ],
            price_range: None,
            maps_url: maps_link("Alpes+Guadalupe+Zacatecas"),
            brochure_url: None,
        },
        DevelopmentConfig {
            key: "paseo_colorines".to_string(),
            name: "Paseo Colorines".to_string(),
            aliases: vec!["colorines".to_string()],
            description: "Casas amplias en zona consolidada".to_string(),
            models: vec![],
            price_range: Some(PriceRange { min: 3_000_000, max: 3_600_000 }),
            maps_url: maps_link("Paseo+Colorines+Zacatecas"),
            brochure_url: None,
        },
        DevelopmentConfig {
            key: "citadella_del_nogal".to_string(),
            name: "Citadella del Nogal".to_string(),
            aliases: vec!["citadella".to_string()],
            description: "Terrenos residenciales para construir".to_string(),
            models: vec![],
            price_range: None,
            maps_url: maps_link("Citadella+del+Nogal+Zacatecas"),
            brochure_url: None,
        },
    ]
}

fn default_banks() -> Vec<BankEntry> {
    vec![
        BankEntry { name: "BBVA".to_string(), aliases: vec!["bancomer".to_string()] },
        BankEntry { name: "Banorte".to_string(), aliases: vec![] },
        BankEntry { name: "HSBC".to_string(), aliases: vec![] },
        BankEntry { name: "Santander".to_string(), aliases: vec![] },
        BankEntry { name: "Scotiabank".to_string(), aliases: vec!["scotia".to_string()] },
        BankEntry { name: "Banregio".to_string(), aliases: vec![] },
        BankEntry { name: "Infonavit".to_string(), aliases: vec![] },
        BankEntry { name: "Fovissste".to_string(), aliases: vec![] },
    ]
}
