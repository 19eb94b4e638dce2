use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::core::geo::{haversine_km, CircleArea, GeoPoint, KM_PER_DEG};
use crate::core::store::Store;
use crate::core::types::{Hotspot, Incident};
use crate::pipeline::features::dominant;

/// A point is a core point when its neighborhood (itself included) reaches
/// this size.
const MIN_SAMPLES: usize = 3;

/// Density-cluster the located incidents of the trailing window and replace
/// the persisted hotspot set for that window tag. Idempotent: unchanged
/// incidents yield the same hotspots on every run.
pub fn build_hotspots(
    store: &mut Store,
    window_days: u32,
    radius_km: f64,
    now: DateTime<Utc>,
) -> Result<Vec<Hotspot>> {
    let window = format!("{window_days}d");
    let since = now - Duration::days(window_days as i64);
    let incidents = store.located_incidents_since(since)?;
    let scores = store.latest_scores()?;

    let clusters = density_clusters(&incidents, radius_km);
    let mut hotspots = Vec::with_capacity(clusters.len());
    for members in &clusters {
        let centroid = centroid_of(members, &incidents);
        let intensity = members
            .iter()
            .map(|&i| scores.get(&incidents[i].id).copied().unwrap_or(0.0))
            .sum::<f64>()
            / members.len() as f64;
        let types: Vec<&str> = members
            .iter()
            .map(|&i| incidents[i].incident_type.as_str())
            .collect();
        hotspots.push(Hotspot {
            window: window.clone(),
            centroid,
            area: CircleArea::from_km(centroid, radius_km),
            intensity,
            dominant_type: dominant(&types).unwrap_or("unknown").to_string(),
            member_count: members.len(),
            created_at: now,
        });
    }

    store.replace_hotspots(&window, &hotspots)?;
    info!(
        %window,
        incidents = incidents.len(),
        hotspots = hotspots.len(),
        "hotspot set rebuilt"
    );
    Ok(hotspots)
}

fn centroid_of(members: &[usize], incidents: &[Incident]) -> GeoPoint {
    let n = members.len() as f64;
    let (lat, lon) = members.iter().fold((0.0, 0.0), |(lat, lon), &i| {
        let p = incidents[i].location.unwrap_or(GeoPoint::new(0.0, 0.0));
        (lat + p.lat, lon + p.lon)
    });
    GeoPoint::new(lat / n, lon / n)
}

#[derive(Clone, Copy, PartialEq)]
enum PointState {
    Unvisited,
    Noise,
    Clustered(usize),
}

/// DBSCAN over incident locations with a great-circle metric. Neighbor
/// candidates come from a degree grid sized to the radius, so only the
/// surrounding 3x3 cells need exact distance checks. Noise points are
/// discarded rather than reported.
fn density_clusters(incidents: &[Incident], radius_km: f64) -> Vec<Vec<usize>> {
    let points: Vec<(usize, GeoPoint)> = incidents
        .iter()
        .enumerate()
        .filter_map(|(i, inc)| inc.location.map(|p| (i, p)))
        .collect();

    // Cell edges are padded past one radius on both axes so the 3x3 scan
    // always covers the radius. Longitude degrees shrink by cos(latitude),
    // so the column width is stretched by the worst cosine among the points.
    let lat_cell = (1.01 * radius_km / KM_PER_DEG).max(1e-6);
    let min_cos = points
        .iter()
        .map(|&(_, p)| p.lat.to_radians().cos())
        .fold(1.0_f64, f64::min)
        .max(0.01);
    let lon_cell = lat_cell / min_cos;

    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (slot, &(_, p)) in points.iter().enumerate() {
        grid.entry(grid_key(p, lat_cell, lon_cell)).or_default().push(slot);
    }

    let neighbors_of = |slot: usize| -> Vec<usize> {
        let (_, p) = points[slot];
        let (row, col) = grid_key(p, lat_cell, lon_cell);
        let mut out = Vec::new();
        for dr in -1..=1 {
            for dc in -1..=1 {
                let Some(candidates) = grid.get(&(row + dr, col + dc)) else {
                    continue;
                };
                for &other in candidates {
                    if haversine_km(p, points[other].1) <= radius_km {
                        out.push(other);
                    }
                }
            }
        }
        out
    };

    let mut states = vec![PointState::Unvisited; points.len()];
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for slot in 0..points.len() {
        if states[slot] != PointState::Unvisited {
            continue;
        }
        let seed_neighbors = neighbors_of(slot);
        if seed_neighbors.len() < MIN_SAMPLES {
            states[slot] = PointState::Noise;
            continue;
        }

        let cluster_id = clusters.len();
        clusters.push(Vec::new());
        states[slot] = PointState::Clustered(cluster_id);
        clusters[cluster_id].push(points[slot].0);

        // breadth-first expansion through density-reachable points
        let mut frontier = seed_neighbors;
        let mut cursor = 0;
        while cursor < frontier.len() {
            let current = frontier[cursor];
            cursor += 1;
            match states[current] {
                PointState::Clustered(_) => continue,
                PointState::Noise | PointState::Unvisited => {
                    let was_unvisited = states[current] == PointState::Unvisited;
                    states[current] = PointState::Clustered(cluster_id);
                    clusters[cluster_id].push(points[current].0);
                    if was_unvisited {
                        let expansion = neighbors_of(current);
                        if expansion.len() >= MIN_SAMPLES {
                            frontier.extend(expansion);
                        }
                    }
                }
            }
        }
    }
    clusters
}

fn grid_key(p: GeoPoint, lat_cell: f64, lon_cell: f64) -> (i64, i64) {
    ((p.lat / lat_cell).floor() as i64, (p.lon / lon_cell).floor() as i64)
}
