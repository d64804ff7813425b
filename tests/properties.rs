use proptest::prelude::*;

use indexmap::IndexMap;

use modwire::models::{AttributeValue, Filter};
use modwire::{Version, VersionRange};

fn version() -> impl Strategy<Value = (u64, u64, u64)> {
    (0u64..20, 0u64..20, 0u64..20)
}

proptest! {
    #[test]
    fn version_order_matches_components(a in version(), b in version()) {
        let left = Version::parse(&format!("{}.{}.{}", a.0, a.1, a.2)).unwrap();
        let right = Version::parse(&format!("{}.{}.{}", b.0, b.1, b.2)).unwrap();
        prop_assert_eq!(left.cmp(&right), a.cmp(&b));
    }

    #[test]
    fn qualifier_sorts_between_micro_steps(v in version(), qualifier in "[a-z]{1,8}") {
        let plain = Version::new(v.0, v.1, v.2);
        let qualified = plain.clone().with_qualifier(qualifier);
        let next = Version::new(v.0, v.1, v.2 + 1);
        prop_assert!(plain < qualified);
        prop_assert!(qualified < next);
    }

    #[test]
    fn half_open_range_excludes_right_endpoint(
        low in version(),
        span in 1u64..5,
        probe in version(),
    ) {
        let left = Version::new(low.0, low.1, low.2);
        let right = Version::new(low.0 + span, 0, 0);
        let range = VersionRange::parse(&format!("[{},{})", left, right)).unwrap();
        let probe = Version::new(probe.0, probe.1, probe.2);
        prop_assert_eq!(range.includes(&probe), probe >= left && probe < right);
        prop_assert!(!range.includes(&right));
    }

    #[test]
    fn range_filter_agrees_with_range(low in version(), span in 1u64..5, probe in version()) {
        let left = Version::new(low.0, low.1, low.2);
        let right = Version::new(low.0 + span, 0, 0);
        let range = VersionRange::half_open(left, right);
        let filter = Filter::parse(&range.to_filter("version")).unwrap();
        let probe = Version::new(probe.0, probe.1, probe.2);
        let attributes: IndexMap<String, AttributeValue> =
            IndexMap::from([("version".to_string(), probe.clone().into())]);
        prop_assert_eq!(filter.matches(&attributes, false), range.includes(&probe));
    }
}
