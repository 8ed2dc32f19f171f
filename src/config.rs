// Run configuration: where the datasets live, how to decode them and the
// unit prices / scenario parameters the reports need.
//
// Every field has a default so a partial JSON file (or none at all) works.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FleetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Utf8,
    Latin1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Urban,
    Regional,
    LongHaul,
    Electric,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 4] = [
        DatasetKind::Urban,
        DatasetKind::Regional,
        DatasetKind::LongHaul,
        DatasetKind::Electric,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::Urban => "urban",
            DatasetKind::Regional => "regional",
            DatasetKind::LongHaul => "long_haul",
            DatasetKind::Electric => "electric",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSource {
    pub file: PathBuf,
    #[serde(default = "default_encoding")]
    pub encoding: Encoding,
}

fn default_encoding() -> Encoding {
    Encoding::Utf8
}

impl DatasetSource {
    fn new(file: &str, encoding: Encoding) -> Self {
        DatasetSource {
            file: PathBuf::from(file),
            encoding,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetsConfig {
    pub urban: DatasetSource,
    pub regional: DatasetSource,
    pub long_haul: DatasetSource,
    pub electric: DatasetSource,
}

impl Default for DatasetsConfig {
    fn default() -> Self {
        DatasetsConfig {
            urban: DatasetSource::new("datos_vehiculo_urbano.csv", Encoding::Utf8),
            regional: DatasetSource::new("datos_vehiculo_regional.csv", Encoding::Latin1),
            long_haul: DatasetSource::new("BDVehiculosLHOK.csv", Encoding::Utf8),
            electric: DatasetSource::new("autos_eh.csv", Encoding::Utf8),
        }
    }
}

/// Unit prices in COP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub diesel_per_gallon: f64,
    pub litres_per_gallon: f64,
    pub electricity_per_kwh: f64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        PriceConfig {
            diesel_per_gallon: 10561.0,
            litres_per_gallon: 3.78541,
            electricity_per_kwh: 1051.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmissionColumn {
    Average,
    Unloaded,
    Loaded,
}

impl EmissionColumn {
    pub fn column(&self) -> &'static str {
        match self {
            EmissionColumn::Average => "Emision_CO2_avg",
            EmissionColumn::Unloaded => "L_CO2_gkm",
            EmissionColumn::Loaded => "R_CO2_gkm",
        }
    }
}

/// Regional fleet scenario: which make to drill into and how big the fleet is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionalScenario {
    pub emission_column: EmissionColumn,
    /// Make to analyse; the most frequent make when unset.
    pub make: Option<String>,
    pub fleet_size: u32,
    pub daily_km: f64,
    pub city_emissions_tonnes: f64,
}

impl Default for RegionalScenario {
    fn default() -> Self {
        RegionalScenario {
            emission_column: EmissionColumn::Average,
            make: None,
            fleet_size: 10,
            daily_km: 100.0,
            city_emissions_tonnes: 10000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectricTruck {
    pub name: String,
    pub payload_kg: f64,
    pub battery_kwh: f64,
    pub range_km: f64,
    pub kwh_per_km: f64,
    pub charge_hours: f64,
}

fn default_trucks() -> Vec<ElectricTruck> {
    vec![
        ElectricTruck {
            name: "Mercedes Benz eActross".to_string(),
            payload_kg: 40000.0,
            battery_kwh: 600.0,
            range_km: 500.0,
            kwh_per_km: 1.19,
            charge_hours: 0.833333333,
        },
        ElectricTruck {
            name: "Tesla Semi".to_string(),
            payload_kg: 22000.0,
            battery_kwh: 900.0,
            range_km: 800.0,
            kwh_per_km: 1.1,
            charge_hours: 0.714285714,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub datasets: DatasetsConfig,
    pub prices: PriceConfig,
    pub regional: RegionalScenario,
    pub z_low: f64,
    pub z_high: f64,
    pub top_n: usize,
    pub preview_rows: usize,
    pub trucks: Vec<ElectricTruck>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("."),
            output_dir: PathBuf::from("reports"),
            datasets: DatasetsConfig::default(),
            prices: PriceConfig::default(),
            regional: RegionalScenario::default(),
            z_low: -3.0,
            z_high: 3.0,
            top_n: 5,
            preview_rows: 5,
            trucks: default_trucks(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.z_low >= self.z_high {
            return Err(FleetError::Config(format!(
                "z_low ({}) must be below z_high ({})",
                self.z_low, self.z_high
            )));
        }
        if self.prices.litres_per_gallon <= 0.0 {
            return Err(FleetError::Config(
                "litres_per_gallon must be positive".to_string(),
            ));
        }
        if self.regional.city_emissions_tonnes <= 0.0 {
            return Err(FleetError::Config(
                "city_emissions_tonnes must be positive".to_string(),
            ));
        }
        if self.top_n == 0 {
            return Err(FleetError::Config("top_n must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn source(&self, kind: DatasetKind) -> &DatasetSource {
        match kind {
            DatasetKind::Urban => &self.datasets.urban,
            DatasetKind::Regional => &self.datasets.regional,
            DatasetKind::LongHaul => &self.datasets.long_haul,
            DatasetKind::Electric => &self.datasets.electric,
        }
    }

    /// Absolute-or-relative path of a dataset, resolved against `data_dir`.
    pub fn dataset_path(&self, kind: DatasetKind) -> PathBuf {
        self.data_dir.join(&self.source(kind).file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dashboard_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.prices.diesel_per_gallon, 10561.0);
        assert_eq!(cfg.datasets.regional.encoding, Encoding::Latin1);
        assert_eq!(cfg.regional.fleet_size, 10);
        assert_eq!(cfg.trucks.len(), 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"data_dir": "data", "regional": {"make": "Volvo", "emission_column": "loaded"},
                "datasets": {"urban": {"file": "urbano.csv", "encoding": "latin1"}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.regional.make.as_deref(), Some("Volvo"));
        assert_eq!(cfg.regional.emission_column.column(), "R_CO2_gkm");
        assert_eq!(cfg.regional.daily_km, 100.0);
        assert_eq!(cfg.datasets.urban.encoding, Encoding::Latin1);
        assert_eq!(cfg.datasets.electric.file, PathBuf::from("autos_eh.csv"));
        assert_eq!(
            cfg.dataset_path(DatasetKind::Urban),
            PathBuf::from("data").join("urbano.csv")
        );
    }

    #[test]
    fn validate_rejects_inverted_z_bounds() {
        let cfg = Config {
            z_low: 2.0,
            z_high: -2.0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(FleetError::Config(_))));
    }
}
