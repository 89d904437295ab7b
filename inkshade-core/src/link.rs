//! Hyperlink regions of a page and the policy for following them.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::backend::LinkRegion;
use crate::error::{CoreError, CoreResult};
use crate::geometry::{Point, Rect};

pub const DEFAULT_ALLOWED_SCHEMES: [&str; 4] = ["http", "https", "mailto", "tel"];

const DESCRIPTION_LIMIT: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkTarget {
    Internal { page: usize, point: Option<Point> },
    External { url: String },
}

impl LinkTarget {
    /// Internal targets navigate straight away; external ones always wait for
    /// the user to confirm.
    pub fn activate(&self) -> Activation {
        match self {
            LinkTarget::Internal { page, point } => Activation::Navigate {
                page: *page,
                point: *point,
            },
            LinkTarget::External { url } => Activation::PendingConfirmation(PendingLink {
                url: url.clone(),
            }),
        }
    }

    /// Short human-readable label, suitable for a tooltip.
    pub fn describe(&self) -> String {
        match self {
            LinkTarget::Internal { page, .. } => format!("Go to page {}", page + 1),
            LinkTarget::External { url } if url.chars().count() > DESCRIPTION_LIMIT => {
                let head: String = url.chars().take(DESCRIPTION_LIMIT - 3).collect();
                format!("{head}...")
            }
            LinkTarget::External { url } => url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    Navigate { page: usize, point: Option<Point> },
    PendingConfirmation(PendingLink),
}

/// An external link waiting for confirmation. Only [`LinkTarget::activate`]
/// creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    url: String,
}

impl PendingLink {
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPolicy {
    allowed_schemes: Vec<String>,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_SCHEMES)
    }
}

impl LinkPolicy {
    pub fn new<I, S>(schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_schemes: schemes
                .into_iter()
                .map(|s| s.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn allows(&self, scheme: &str) -> bool {
        self.allowed_schemes
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(scheme))
    }

    /// Releases the URL of a confirmed link if its scheme is allowed.
    pub fn confirm(&self, pending: PendingLink) -> CoreResult<Url> {
        let url = Url::parse(pending.url.trim())
            .map_err(|_| CoreError::DisallowedLink("unknown".to_string()))?;
        if !self.allows(url.scheme()) {
            return Err(CoreError::DisallowedLink(url.scheme().to_string()));
        }
        debug!(%url, "external link confirmed");
        Ok(url)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkLayer {
    page: usize,
    regions: Vec<LinkRegion>,
}

impl LinkLayer {
    pub fn new(page: usize, regions: Vec<LinkRegion>) -> Self {
        Self { page, regions }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn regions(&self) -> &[LinkRegion] {
        &self.regions
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Target of the topmost region under `point`. Regions later in page
    /// order sit on top.
    pub fn hit_test(&self, point: Point) -> Option<&LinkTarget> {
        self.regions
            .iter()
            .rev()
            .find(|region| region.quad.contains(point))
            .map(|region| &region.target)
    }

    pub fn links_in(&self, rect: Rect) -> Vec<&LinkRegion> {
        self.regions
            .iter()
            .filter(|region| region.quad.bounds().intersects(&rect))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Quad;

    fn region(rect: Rect, target: LinkTarget) -> LinkRegion {
        LinkRegion {
            quad: Quad::from_rect(rect),
            target,
        }
    }

    fn layer() -> LinkLayer {
        LinkLayer::new(
            0,
            vec![
                region(
                    Rect::new(0.0, 0.0, 100.0, 20.0),
                    LinkTarget::Internal {
                        page: 4,
                        point: None,
                    },
                ),
                region(
                    Rect::new(50.0, 0.0, 150.0, 20.0),
                    LinkTarget::External {
                        url: "https://example.org/paper".into(),
                    },
                ),
            ],
        )
    }

    #[test]
    fn topmost_region_wins() {
        let layer = layer();
        assert!(matches!(
            layer.hit_test(Point::new(75.0, 10.0)),
            Some(LinkTarget::External { .. })
        ));
        assert!(matches!(
            layer.hit_test(Point::new(10.0, 10.0)),
            Some(LinkTarget::Internal { page: 4, .. })
        ));
        assert!(layer.hit_test(Point::new(10.0, 40.0)).is_none());
        assert_eq!(layer.links_in(Rect::new(120.0, 5.0, 130.0, 6.0)).len(), 1);
    }

    #[test]
    fn external_links_need_confirmation() {
        let layer = layer();
        let target = layer.hit_test(Point::new(140.0, 10.0)).unwrap();
        let Activation::PendingConfirmation(pending) = target.activate() else {
            panic!("external link navigated without confirmation");
        };
        let url = LinkPolicy::default().confirm(pending).unwrap();
        assert_eq!(url.as_str(), "https://example.org/paper");
    }

    #[test]
    fn disallowed_schemes_are_refused() {
        let policy = LinkPolicy::default();
        let pending = |url: &str| match (LinkTarget::External { url: url.into() }).activate() {
            Activation::PendingConfirmation(pending) => pending,
            other => panic!("unexpected activation {other:?}"),
        };
        assert!(matches!(
            policy.confirm(pending("javascript:alert(1)")),
            Err(CoreError::DisallowedLink(scheme)) if scheme == "javascript"
        ));
        assert!(matches!(
            policy.confirm(pending("file:///etc/passwd")),
            Err(CoreError::DisallowedLink(_))
        ));
        assert!(policy.confirm(pending("mailto:someone@example.org")).is_ok());
        assert!(policy.confirm(pending("not a url")).is_err());
    }

    #[test]
    fn descriptions_are_truncated() {
        let long = LinkTarget::External {
            url: format!("https://example.org/{}", "a".repeat(80)),
        };
        assert_eq!(long.describe().chars().count(), DESCRIPTION_LIMIT);
        assert_eq!(
            LinkTarget::Internal { page: 0, point: None }.describe(),
            "Go to page 1"
        );
    }
}
