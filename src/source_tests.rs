// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Unit tests for source authority ordering and the overwrite policy table.

#[cfg(test)]
mod tests {
    use crate::source::{overwrite_disposition, Disposition, Source};

    const ALL: [Source; 4] = [
        Source::Kubernetes,
        Source::CustomResource,
        Source::Local,
        Source::KvStore,
    ];

    #[test]
    fn test_authority_total_order() {
        assert!(Source::KvStore > Source::Local);
        assert!(Source::Local > Source::CustomResource);
        assert!(Source::CustomResource > Source::Kubernetes);
    }

    #[test]
    fn test_equal_authority_allows_overwrite() {
        for src in ALL {
            assert!(src.allows_overwrite_of(src), "{src} must replace itself");
        }
    }

    #[test]
    fn test_higher_authority_allows_overwrite() {
        assert!(Source::KvStore.allows_overwrite_of(Source::Kubernetes));
        assert!(Source::Local.allows_overwrite_of(Source::CustomResource));
        assert!(Source::CustomResource.allows_overwrite_of(Source::Kubernetes));
    }

    #[test]
    fn test_lower_authority_rejected() {
        assert!(!Source::Kubernetes.allows_overwrite_of(Source::KvStore));
        assert!(!Source::Kubernetes.allows_overwrite_of(Source::Local));
        assert!(!Source::Kubernetes.allows_overwrite_of(Source::CustomResource));
        assert!(!Source::CustomResource.allows_overwrite_of(Source::Local));
    }

    #[test]
    fn test_suppressed_pairs() {
        for existing in [Source::KvStore, Source::Local, Source::CustomResource] {
            assert_eq!(
                overwrite_disposition(existing, Source::Kubernetes),
                Disposition::Suppress,
                "kubernetes losing to {existing} is an expected race"
            );
        }
    }

    #[test]
    fn test_all_other_pairs_surface() {
        for existing in ALL {
            for attempted in ALL {
                let suppressed = attempted == Source::Kubernetes
                    && matches!(
                        existing,
                        Source::KvStore | Source::Local | Source::CustomResource
                    );
                let expected = if suppressed {
                    Disposition::Suppress
                } else {
                    Disposition::Surface
                };
                assert_eq!(
                    overwrite_disposition(existing, attempted),
                    expected,
                    "({existing}, {attempted})"
                );
            }
        }
    }
}
