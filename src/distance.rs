use rand::Rng;
use std::sync::Arc;
use tracing::debug;

use crate::config::DistanceConfig;

/// Source of the multiplicative jitter applied to every estimate.
pub type NoiseFn = Arc<dyn Fn() -> f32 + Send + Sync>;

/// Approximate physical width in meters of common object classes.
const REFERENCE_SIZES: &[(&str, f32)] = &[
    // people
    ("person", 0.5),
    ("man", 0.5),
    ("woman", 0.5),
    ("child", 0.35),
    ("baby", 0.25),
    ("adult", 0.5),
    ("pedestrian", 0.5),
    ("crowd", 3.0),
    ("human", 0.5),
    // vehicles
    ("bicycle", 0.6),
    ("bike", 0.6),
    ("car", 1.8),
    ("automobile", 1.8),
    ("suv", 1.9),
    ("truck", 2.5),
    ("pickup_truck", 2.0),
    ("van", 2.0),
    ("bus", 2.6),
    ("train", 3.0),
    ("motorcycle", 0.8),
    ("scooter", 0.5),
    ("skateboard", 0.8),
    ("surfboard", 2.0),
    ("skis", 1.8),
    ("snowboard", 1.5),
    ("airplane", 20.0),
    ("boat", 3.0),
    ("taxi", 1.8),
    ("golf_cart", 1.4),
    ("vehicle", 1.8),
    // street furniture
    ("traffic_light", 0.3),
    ("fire_hydrant", 0.5),
    ("stop_sign", 0.6),
    ("parking_meter", 0.5),
    ("bench", 1.2),
    // indoor furniture
    ("chair", 0.5),
    ("armchair", 0.7),
    ("stool", 0.4),
    ("office_chair", 0.65),
    ("sofa", 1.8),
    ("couch", 1.8),
    ("loveseat", 1.4),
    ("ottoman", 0.5),
    ("table", 1.5),
    ("coffee_table", 0.9),
    ("side_table", 0.5),
    ("dining_table", 1.5),
    ("desk", 1.4),
    ("dresser", 1.2),
    ("nightstand", 0.5),
    ("bookshelf", 0.9),
    ("bookcase", 1.0),
    ("cabinet", 0.8),
    ("bed", 1.5),
    ("crib", 0.8),
    ("door", 0.9),
    ("doorway", 0.9),
    ("steps", 1.0),
    ("stairs", 1.0),
    // electronics
    ("laptop", 0.35),
    ("computer", 0.4),
    ("tablet", 0.2),
    ("keyboard", 0.4),
    ("mouse", 0.07),
    ("monitor", 0.55),
    ("tv", 1.0),
    ("television", 1.0),
    ("phone", 0.1),
    ("cell_phone", 0.07),
    ("smartphone", 0.08),
    ("remote", 0.05),
    ("speaker", 0.25),
    ("printer", 0.5),
    ("whiteboard", 1.2),
    // appliances
    ("refrigerator", 0.8),
    ("fridge", 0.8),
    ("microwave", 0.5),
    ("oven", 0.6),
    ("stove", 0.6),
    ("dishwasher", 0.6),
    ("washing_machine", 0.65),
    ("toaster", 0.3),
    ("sink", 0.6),
    ("toilet", 0.4),
    ("fan", 0.45),
    ("vacuum", 0.4),
    ("hair_drier", 0.2),
    // carried and tabletop objects
    ("backpack", 0.4),
    ("handbag", 0.3),
    ("tie", 0.1),
    ("suitcase", 0.7),
    ("umbrella", 1.0),
    ("frisbee", 0.25),
    ("sports_ball", 0.2),
    ("kite", 0.5),
    ("baseball_bat", 0.9),
    ("baseball_glove", 0.25),
    ("tennis_racket", 0.7),
    ("bottle", 0.1),
    ("wine_glass", 0.08),
    ("cup", 0.1),
    ("fork", 0.02),
    ("knife", 0.02),
    ("spoon", 0.02),
    ("bowl", 0.2),
    ("banana", 0.2),
    ("apple", 0.08),
    ("sandwich", 0.2),
    ("orange", 0.08),
    ("broccoli", 0.15),
    ("carrot", 0.15),
    ("hot_dog", 0.15),
    ("pizza", 0.35),
    ("donut", 0.1),
    ("cake", 0.25),
    ("potted_plant", 0.3),
    ("book", 0.2),
    ("clock", 0.3),
    ("vase", 0.2),
    ("scissors", 0.15),
    ("teddy_bear", 0.3),
    ("toothbrush", 0.02),
    // animals
    ("bird", 0.2),
    ("cat", 0.4),
    ("dog", 0.6),
    ("horse", 2.0),
    ("sheep", 1.2),
    ("cow", 2.0),
    ("elephant", 3.0),
    ("bear", 2.0),
    ("zebra", 2.0),
    ("giraffe", 1.5),
];

/// Heuristic monocular distance from bounding-box width and a per-class size prior.
#[derive(Clone)]
pub struct DistanceEstimator {
    config: DistanceConfig,
    noise: NoiseFn,
}

impl std::fmt::Debug for DistanceEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistanceEstimator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DistanceEstimator {
    pub fn new(config: DistanceConfig) -> Self {
        let amplitude = config.jitter;
        let noise: NoiseFn = Arc::new(move || {
            if amplitude <= 0.0 {
                0.0
            } else {
                rand::thread_rng().gen_range(-amplitude..amplitude)
            }
        });
        Self { config, noise }
    }

    /// Estimator with jitter disabled, for reproducible output.
    pub fn deterministic(config: DistanceConfig) -> Self {
        Self::with_noise(config, Arc::new(|| 0.0))
    }

    pub fn with_noise(config: DistanceConfig, noise: NoiseFn) -> Self {
        Self { config, noise }
    }

    pub fn config(&self) -> &DistanceConfig {
        &self.config
    }

    /// Reference width in meters for a class; unknown classes get the default size.
    pub fn reference_size(&self, label: &str) -> f32 {
        let key = label.trim().to_lowercase().replace(' ', "_");
        if let Some(size) = self.config.reference_overrides.get(&key) {
            return *size;
        }
        REFERENCE_SIZES
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, size)| *size)
            .unwrap_or(self.config.default_reference_size)
    }

    pub fn estimate(&self, label: &str, normalized_width: f32, normalized_height: f32) -> f32 {
        let cfg = &self.config;
        if normalized_width * normalized_height < cfg.min_object_size || normalized_width <= 0.0 {
            return cfg.max_distance;
        }

        let reference = self.reference_size(label);
        let raw = (reference / (normalized_width * cfg.scale_factor)) * cfg.base_distance;
        let jitter = (self.noise)().clamp(-cfg.jitter.abs(), cfg.jitter.abs());
        let distance = (raw * (1.0 + jitter)).clamp(cfg.min_distance, cfg.max_distance);

        debug!(
            "distance for {} (w={:.3}, h={:.3}): {:.2}m",
            label, normalized_width, normalized_height, distance
        );
        distance
    }
}

impl Default for DistanceEstimator {
    fn default() -> Self {
        Self::new(DistanceConfig::default())
    }
}
