use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::principal::Actor;
use crate::errors::AppResult;

const EDGE_EPSILON: f64 = 1e-9;

/// Outer ring of a GeoJSON polygon, as (x = longitude, y = latitude) pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub ring: Vec<(f64, f64)>,
}

impl Polygon {
    /// Reads the outer ring of a GeoJSON `Polygon`.
    ///
    /// Returns `None` when there is nothing to check against: empty or absent
    /// geometry, a non-Polygon type, no rings, or unreadable coordinates.
    pub fn from_geojson(value: &Value) -> Option<Self> {
        let geometry = value.as_object()?;
        if geometry.get("type").and_then(Value::as_str) != Some("Polygon") {
            return None;
        }
        let outer = geometry.get("coordinates")?.as_array()?.first()?.as_array()?;
        let ring = outer
            .iter()
            .map(|vertex| {
                let pair = vertex.as_array()?;
                Some((pair.first()?.as_f64()?, pair.get(1)?.as_f64()?))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self { ring })
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        point_in_polygon(x, y, &self.ring)
    }
}

/// Ray casting against the outer ring. A closing vertex that repeats the
/// first one is ignored and the ring is walked with wraparound.
///
/// Rings with fewer than 3 distinct vertices contain everything. Points
/// exactly on an edge may land either way.
pub fn point_in_polygon(x: f64, y: f64, ring: &[(f64, f64)]) -> bool {
    let vertices = match ring.split_last() {
        Some((last, rest)) if !rest.is_empty() && rest[0] == *last => rest,
        _ => ring,
    };
    if vertices.len() < 3 {
        return true;
    }

    let mut inside = false;
    let mut j = vertices.len() - 1;
    for (i, &(xi, yi)) in vertices.iter().enumerate() {
        let (xj, yj) = vertices[j];
        let crosses = ((yi > y) != (yj > y)) && x < (xj - xi) * (y - yi) / (yj - yi + EDGE_EPSILON) + xi;
        if crosses {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Whether a claimed position falls inside the object's geofence.
///
/// Missing coordinates or missing geometry are permissive.
pub fn is_on_site(polygon: &Value, latitude: Option<f64>, longitude: Option<f64>) -> bool {
    let (Some(lat), Some(lon)) = (latitude, longitude) else {
        return true;
    };
    match Polygon::from_geojson(polygon) {
        Some(polygon) => polygon.contains(lon, lat),
        None => true,
    }
}

/// Presence check for on-site actions: the actor needs an open inspection
/// visit on the object, positioned inside the object's polygon.
pub async fn check_presence_guard(
    pool: &SqlitePool,
    actor: &Actor,
    object_id: Uuid,
    polygon: &Value,
) -> AppResult<bool> {
    if actor.is_superuser {
        return Ok(true);
    }

    let visit: Option<(Option<f64>, Option<f64>)> = sqlx::query_as(
        r#"
        SELECT latitude, longitude FROM inspection_visits
        WHERE object_id = ? AND inspector_id = ? AND ended_at IS NULL
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .bind(object_id)
    .bind(actor.user_id)
    .fetch_optional(pool)
    .await?;

    let confirmed = match visit {
        Some((latitude, longitude)) => is_on_site(polygon, latitude, longitude),
        None => false,
    };
    tracing::debug!(user_id = %actor.user_id, object_id = %object_id, confirmed, "presence check");
    Ok(confirmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square() -> Vec<(f64, f64)> {
        vec![(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0), (0.0, 0.0)]
    }

    #[test]
    fn square_contains_its_centre_only() {
        assert!(point_in_polygon(5.0, 5.0, &square()));
        assert!(!point_in_polygon(50.0, 50.0, &square()));
        assert!(!point_in_polygon(-1.0, 5.0, &square()));
    }

    #[test]
    fn open_rings_close_implicitly() {
        let closed = square();
        let open = &closed[..4];
        assert!(point_in_polygon(5.0, 5.0, open));
        assert!(!point_in_polygon(5.0, 50.0, open));
        assert!(!point_in_polygon(-5.0, 5.0, open));
    }

    #[test]
    fn degenerate_rings_are_permissive() {
        assert!(point_in_polygon(50.0, 50.0, &[]));
        assert!(point_in_polygon(50.0, 50.0, &[(0.0, 0.0), (1.0, 1.0)]));
        assert!(point_in_polygon(50.0, 50.0, &[(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)]));

        let empty = json!({"type": "Polygon", "coordinates": [[]]});
        assert!(is_on_site(&empty, Some(50.0), Some(50.0)));
    }

    #[test]
    fn geojson_axes_are_lon_lat() {
        let strip = json!({
            "type": "Polygon",
            "coordinates": [[[30.0, 50.0], [30.0, 51.0], [31.0, 51.0], [31.0, 50.0], [30.0, 50.0]]]
        });
        assert!(is_on_site(&strip, Some(50.5), Some(30.5)));
        assert!(!is_on_site(&strip, Some(30.5), Some(50.5)));
    }

    #[test]
    fn missing_inputs_skip_the_check() {
        let strip = json!({"type": "Polygon", "coordinates": [[[0, 0], [0, 1], [1, 1], [1, 0], [0, 0]]]});
        assert!(is_on_site(&strip, None, Some(5.0)));
        assert!(is_on_site(&json!({}), Some(5.0), Some(5.0)));
        assert!(is_on_site(&json!({"type": "Point", "coordinates": [9, 9]}), Some(5.0), Some(5.0)));
    }
}
