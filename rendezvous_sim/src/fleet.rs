//! Seeded synthetic fleets.
//!
//! Vehicles random-walk through a bounding box around the operating
//! latitude. On top of the background traffic the generator can plant
//! convoys (a follower shadowing a leader a couple of meters away, which
//! must always be reported) and malformed input (unparseable trips and
//! short coordinate rows, which must be skipped).

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rendezvous_core::geodesic::{meters_per_degree_lon, METERS_PER_DEGREE};
use rendezvous_core::VehiclePair;
use rendezvous_env::{TrajectoryRecord, VecSource};

/// Configuration for a synthetic fleet.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of background vehicles
    pub vehicles: usize,

    /// Trips generated per vehicle
    pub trips_per_vehicle: usize,

    /// Coordinates per trip
    pub points_per_trip: usize,

    /// Seconds between consecutive coordinates
    pub sampling_interval_seconds: i64,

    /// Center of the bounding box (degrees)
    pub center_lat: f64,
    pub center_lon: f64,

    /// Half-width of the bounding box (meters)
    pub extent_meters: f64,

    /// Trip start times are drawn from `[base_time, base_time + time_span)`
    pub base_time: i64,
    pub time_span_seconds: i64,

    /// Vehicle speed range (m/s)
    pub min_speed: f64,
    pub max_speed: f64,

    /// GPS noise standard deviation (meters)
    pub gps_noise_m: f64,

    /// Number of planted leader/follower convoys
    pub convoys: usize,

    /// Distance kept by convoy followers (meters)
    pub convoy_offset_m: f64,

    /// Unparseable trips mixed into the source
    pub malformed_trips: usize,

    /// Short coordinate rows injected into otherwise valid trips
    pub malformed_rows: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            vehicles: 20,
            trips_per_vehicle: 2,
            points_per_trip: 20,
            sampling_interval_seconds: 15,
            center_lat: 41.15,
            center_lon: -8.61,
            extent_meters: 500.0,
            base_time: 1_372_636_800,
            time_span_seconds: 1_800,
            min_speed: 2.0,
            max_speed: 12.0,
            gps_noise_m: 1.0,
            convoys: 0,
            convoy_offset_m: 2.0,
            malformed_trips: 0,
            malformed_rows: 0,
        }
    }
}

/// A generated fleet.
#[derive(Debug, Clone, Default)]
pub struct Fleet {
    /// Well-formed trips, ordered by start time
    pub records: Vec<TrajectoryRecord>,

    /// Source positions (after ordering) of unparseable trips
    pub malformed_positions: Vec<usize>,

    /// Pairs planted as convoys; every one must be found
    pub convoy_pairs: Vec<VehiclePair>,
}

impl Fleet {
    /// Builds the ordered source, unparseable trips included.
    pub fn source(&self) -> VecSource {
        let mut source = VecSource::new();
        let mut records = self.records.iter();
        let total = self.records.len() + self.malformed_positions.len();
        for position in 0..total {
            if self.malformed_positions.contains(&position) {
                source.push_malformed(format!("synthetic malformed trip at {}", position));
            } else if let Some(record) = records.next() {
                source.push(record.clone());
            }
        }
        source
    }

    /// Number of trips in the source, malformed ones included.
    pub fn trip_count(&self) -> usize {
        self.records.len() + self.malformed_positions.len()
    }
}

/// Deterministic fleet generator.
pub struct FleetGenerator {
    config: FleetConfig,
    rng: ChaCha8Rng,
}

impl FleetGenerator {
    /// Creates a generator; the same config always yields the same fleet.
    pub fn new(config: FleetConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    /// Generates the fleet.
    pub fn generate(mut self) -> Fleet {
        let mut records = Vec::new();

        for vehicle in 0..self.config.vehicles {
            for _ in 0..self.config.trips_per_vehicle {
                let id = format!("{:08}", 20_000_000 + vehicle);
                records.push(self.random_trip(id));
            }
        }

        let mut convoy_pairs = Vec::new();
        for convoy in 0..self.config.convoys {
            let leader = self.random_trip(format!("LEAD{:03}", convoy));
            let follower = self.follow(&leader, format!("FOLL{:03}", convoy));
            convoy_pairs.extend(VehiclePair::new(&leader.vehicle_id, &follower.vehicle_id));
            records.push(leader);
            records.push(follower);
        }

        for _ in 0..self.config.malformed_rows {
            if records.is_empty() {
                break;
            }
            let trip = self.rng.gen_range(0..records.len());
            let coordinates = &mut records[trip].coordinates;
            let row = self.rng.gen_range(0..=coordinates.len());
            coordinates.insert(row, vec![self.config.center_lon]);
        }

        records.sort_by_key(|r| r.start_time);

        let total = records.len() + self.config.malformed_trips;
        let mut positions: Vec<usize> = (0..total).collect();
        positions.shuffle(&mut self.rng);
        let mut malformed_positions: Vec<usize> =
            positions.into_iter().take(self.config.malformed_trips).collect();
        malformed_positions.sort_unstable();

        Fleet {
            records,
            malformed_positions,
            convoy_pairs,
        }
    }

    fn random_trip(&mut self, vehicle_id: String) -> TrajectoryRecord {
        let config = &self.config;
        let lon_scale = meters_per_degree_lon(config.center_lat);
        let start = config.base_time + self.rng.gen_range(0..config.time_span_seconds.max(1));
        let speed = self.rng.gen_range(config.min_speed..=config.max_speed);
        let mut heading: f64 = self.rng.gen_range(0.0..std::f64::consts::TAU);
        let mut x = self.rng.gen_range(-config.extent_meters..=config.extent_meters);
        let mut y = self.rng.gen_range(-config.extent_meters..=config.extent_meters);
        let noise = if config.gps_noise_m > 0.0 {
            Normal::new(0.0, config.gps_noise_m).ok()
        } else {
            None
        };
        let step = speed * config.sampling_interval_seconds as f64;

        let mut coordinates = Vec::with_capacity(config.points_per_trip);
        for _ in 0..config.points_per_trip {
            let (nx, ny) = match &noise {
                Some(normal) => (normal.sample(&mut self.rng), normal.sample(&mut self.rng)),
                None => (0.0, 0.0),
            };
            coordinates.push(vec![
                config.center_lon + (x + nx) / lon_scale,
                config.center_lat + (y + ny) / METERS_PER_DEGREE,
            ]);

            heading += self.rng.gen_range(-0.5..0.5);
            x = (x + step * heading.cos()).clamp(-config.extent_meters, config.extent_meters);
            y = (y + step * heading.sin()).clamp(-config.extent_meters, config.extent_meters);
        }

        TrajectoryRecord::from_raw(vehicle_id, start, config.sampling_interval_seconds, coordinates)
    }

    /// Copy of `leader` shifted north by the convoy offset.
    fn follow(&self, leader: &TrajectoryRecord, vehicle_id: String) -> TrajectoryRecord {
        let shift = self.config.convoy_offset_m / METERS_PER_DEGREE;
        let coordinates = leader
            .coordinates
            .iter()
            .map(|c| vec![c[0], c[1] + shift])
            .collect();
        TrajectoryRecord::from_raw(
            vehicle_id,
            leader.start_time,
            leader.sampling_interval_seconds,
            coordinates,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_env::TrajectorySource;

    #[test]
    fn test_generation_is_deterministic() {
        let config = FleetConfig {
            convoys: 2,
            malformed_trips: 3,
            ..Default::default()
        };
        let a = FleetGenerator::new(config.clone()).generate();
        let b = FleetGenerator::new(config).generate();
        assert_eq!(a.records, b.records);
        assert_eq!(a.malformed_positions, b.malformed_positions);
    }

    #[test]
    fn test_fleet_shape() {
        let config = FleetConfig {
            vehicles: 5,
            trips_per_vehicle: 3,
            points_per_trip: 10,
            convoys: 2,
            malformed_trips: 4,
            ..Default::default()
        };
        let fleet = FleetGenerator::new(config).generate();

        assert_eq!(fleet.records.len(), 5 * 3 + 2 * 2);
        assert_eq!(fleet.convoy_pairs.len(), 2);
        assert_eq!(fleet.trip_count(), 23);
        assert!(fleet
            .records
            .windows(2)
            .all(|w| w[0].start_time <= w[1].start_time));

        let totals = fleet.source().totals();
        assert_eq!(totals.trips, 23);
        assert_eq!(totals.points, 19 * 10);
    }

    #[test]
    fn test_malformed_rows_are_not_usable() {
        let config = FleetConfig {
            vehicles: 3,
            trips_per_vehicle: 1,
            points_per_trip: 8,
            malformed_rows: 5,
            ..Default::default()
        };
        let fleet = FleetGenerator::new(config).generate();
        let rows: usize = fleet.records.iter().map(|r| r.coordinates.len()).sum();
        let usable: usize = fleet.records.iter().map(|r| r.usable_points()).sum();
        assert_eq!(rows, 3 * 8 + 5);
        assert_eq!(usable, 3 * 8);
    }

    #[test]
    fn test_convoy_follower_stays_close() {
        let config = FleetConfig {
            vehicles: 0,
            convoys: 1,
            ..Default::default()
        };
        let fleet = FleetGenerator::new(config).generate();
        let (a, b) = (&fleet.records[0], &fleet.records[1]);
        assert_eq!(a.start_time, b.start_time);
        for (p, q) in a.coordinates.iter().zip(&b.coordinates) {
            let d = rendezvous_core::precise_distance(p[1], p[0], q[1], q[0]);
            assert!(d < 2.1, "convoy drifted to {}m", d);
        }
    }
}
