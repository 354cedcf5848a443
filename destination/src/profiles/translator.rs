//! Profile-to-wire translation

use crate::proto;

use super::{Profile, RouteSpec};

/// Convert a merged profile into the wire `DestinationProfile`.
///
/// `opaque_protocol` reflects both the profile-wide flag and the
/// requested port's membership in the merged opaque-port set.
pub fn to_proto(profile: &Profile, fqn: &str, port: u16) -> proto::DestinationProfile {
    proto::DestinationProfile {
        fully_qualified_name: fqn.to_string(),
        opaque_protocol: profile.opaque_protocol || profile.opaque_ports.contains(&port),
        routes: profile.routes.iter().map(route_to_proto).collect(),
        retry_budget: profile.retry_budget.map(|budget| proto::RetryBudget {
            retry_ratio: budget.retry_ratio,
            min_retries_per_second: budget.min_retries_per_second,
            ttl_seconds: budget.ttl_seconds,
        }),
        dst_overrides: profile
            .dst_overrides
            .iter()
            .map(|dst| proto::WeightedDst {
                authority: dst.authority.clone(),
                weight: dst.weight,
            })
            .collect(),
        endpoint: None,
    }
}

fn route_to_proto(route: &RouteSpec) -> proto::Route {
    let mut matches = Vec::new();
    if let Some(path_regex) = &route.path_regex {
        matches.push(proto::RequestMatch {
            r#match: Some(proto::request_match::Match::PathRegex(path_regex.clone())),
        });
    }
    if let Some(method) = &route.method {
        matches.push(proto::RequestMatch {
            r#match: Some(proto::request_match::Match::Method(method.clone())),
        });
    }
    let condition = match matches.len() {
        0 => None,
        1 => matches.pop(),
        _ => Some(proto::RequestMatch {
            r#match: Some(proto::request_match::Match::All(proto::RequestMatchSeq {
                matches,
            })),
        }),
    };

    let response_classes = route
        .failure_statuses
        .map(|(min, max)| {
            vec![proto::ResponseClass {
                condition: Some(proto::ResponseMatch {
                    status_min: u32::from(min),
                    status_max: u32::from(max),
                }),
                is_failure: true,
            }]
        })
        .unwrap_or_default();

    proto::Route {
        condition,
        metrics_labels: [("route".to_string(), route.name.clone())]
            .into_iter()
            .collect(),
        response_classes,
        is_retryable: route.is_retryable,
        timeout_ms: route.timeout_ms,
    }
}
