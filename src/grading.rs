use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Academic sub-periods, in chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    First,
    Second,
    Third,
}

impl Term {
    pub const ALL: [Term; 3] = [Term::First, Term::Second, Term::Third];

    pub fn as_key(self) -> &'static str {
        match self {
            Term::First => "firstTerm",
            Term::Second => "secondTerm",
            Term::Third => "thirdTerm",
        }
    }

    pub fn from_key(key: &str) -> Option<Term> {
        match key {
            "firstTerm" => Some(Term::First),
            "secondTerm" => Some(Term::Second),
            "thirdTerm" => Some(Term::Third),
            _ => None,
        }
    }
}

/// School-level category. Selects both the score-component bounds and the
/// grading policy for a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[serde(rename = "prenursery")]
    PreNursery,
    Primary,
    Jss,
    Ss,
}

impl Category {
    pub fn policy(self) -> Policy {
        match self {
            Category::Jss | Category::Ss => Policy::Secondary,
            Category::PreNursery | Category::Primary => Policy::Primary,
        }
    }

    pub fn bounds(self) -> ScoreBounds {
        match self {
            Category::PreNursery | Category::Primary => ScoreBounds {
                weekly_test: 20.0,
                mid_term: 20.0,
                exam: 60.0,
            },
            Category::Jss | Category::Ss => ScoreBounds {
                weekly_test: 10.0,
                mid_term: 20.0,
                exam: 70.0,
            },
        }
    }
}

fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Classify a class-level label by prefix. Returns None for labels that
/// match no known level pattern.
pub fn classify(label: &str) -> Option<Category> {
    let n = normalize_label(label);
    if n.starts_with("JSS") {
        return Some(Category::Jss);
    }
    if n.starts_with("SS") {
        return Some(Category::Ss);
    }
    if n.starts_with("NURSERY1") || n.starts_with("KG") {
        return Some(Category::PreNursery);
    }
    if n.starts_with("NURSERY2") || n.starts_with("PRIMARY") || n.starts_with("BASIC") {
        return Some(Category::Primary);
    }
    None
}

/// Lookup table from class-level label to category, built once from the
/// configured class list. Unknown labels fall back to Primary; the caller
/// is told so it can surface the fallback as a warning.
#[derive(Debug, Clone, Default)]
pub struct CategoryMap {
    by_label: HashMap<String, Category>,
}

impl CategoryMap {
    pub const DEFAULT_CATEGORY: Category = Category::Primary;

    pub fn from_labels<'a, I: IntoIterator<Item = &'a str>>(labels: I) -> Self {
        let mut by_label = HashMap::new();
        for label in labels {
            if let Some(cat) = classify(label) {
                by_label.insert(normalize_label(label), cat);
            }
        }
        CategoryMap { by_label }
    }

    /// Resolve a label to its category. The bool is false when the label was
    /// neither configured nor pattern-matched and the default was used.
    pub fn resolve(&self, label: &str) -> (Category, bool) {
        if let Some(cat) = self.by_label.get(&normalize_label(label)) {
            return (*cat, true);
        }
        match classify(label) {
            Some(cat) => (cat, true),
            None => (Self::DEFAULT_CATEGORY, false),
        }
    }
}

/// Raw per-subject term scores as entered by staff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreComponents {
    pub weekly_test: f64,
    pub mid_term: f64,
    pub exam: f64,
}

/// Per-category component maxima. The three maxima always sum to 100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBounds {
    pub weekly_test: f64,
    pub mid_term: f64,
    pub exam: f64,
}

/// A score component outside its category bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundsError {
    pub component: &'static str,
    pub value: f64,
    pub max: f64,
}

impl fmt::Display for BoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} must be between 0 and {}, got {}",
            self.component, self.max, self.value
        )
    }
}

impl std::error::Error for BoundsError {}

/// Sum the three components after checking each against the category's
/// bounds. Rejects rather than clamps: score-entry UIs need the specific
/// component and range to refuse bad input before it is persisted.
pub fn compute_total(c: &ScoreComponents, category: Category) -> Result<f64, BoundsError> {
    let bounds = category.bounds();
    let checks = [
        ("weeklyTest", c.weekly_test, bounds.weekly_test),
        ("midTerm", c.mid_term, bounds.mid_term),
        ("exam", c.exam, bounds.exam),
    ];
    for (component, value, max) in checks {
        if !value.is_finite() || value < 0.0 || value > max {
            return Err(BoundsError {
                component,
                value,
                max,
            });
        }
    }
    Ok(c.weekly_test + c.mid_term + c.exam)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Secondary,
    Primary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradeRemark {
    /// Letter grade symbol. The primary policy produces remarks only.
    pub grade: Option<&'static str>,
    pub remarks: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct GradeBand {
    pub min: f64,
    pub grade: &'static str,
    pub remarks: &'static str,
}

/// WAEC/NECO-style bands, first match wins walking down. Kept as data so the
/// 60-69 band split can be revised without touching the grading code.
pub const SECONDARY_BANDS: &[GradeBand] = &[
    GradeBand { min: 85.0, grade: "A1", remarks: "Excellent" },
    GradeBand { min: 75.0, grade: "B2", remarks: "Very Good" },
    GradeBand { min: 70.0, grade: "B3", remarks: "Good" },
    GradeBand { min: 65.0, grade: "C4", remarks: "Credit" },
    GradeBand { min: 60.0, grade: "C5", remarks: "Credit" },
    GradeBand { min: 50.0, grade: "C6", remarks: "Credit" },
    GradeBand { min: 45.0, grade: "D7", remarks: "Pass" },
    GradeBand { min: 40.0, grade: "E8", remarks: "Fair" },
];

const SECONDARY_FLOOR: GradeRemark = GradeRemark {
    grade: Some("F9"),
    remarks: "Fail",
};

fn secondary_grade(total: f64) -> GradeRemark {
    for band in SECONDARY_BANDS {
        if total >= band.min {
            return GradeRemark {
                grade: Some(band.grade),
                remarks: band.remarks,
            };
        }
    }
    SECONDARY_FLOOR
}

fn primary_remarks(total: f64) -> &'static str {
    if total >= 90.0 {
        "EXCELLENT"
    } else if total >= 80.0 {
        "V.GOOD"
    } else if total >= 70.0 {
        "GOOD"
    } else if total >= 60.0 {
        "U.CREDIT"
    } else if total >= 51.0 {
        "L.CREDIT"
    } else if total == 50.0 {
        // Exact-match rule: 50 is AVERAGE, 50.x falls through to FAIR.
        "AVERAGE"
    } else if total >= 40.0 {
        "FAIR"
    } else {
        "POOR"
    }
}

/// Map a total to its grade symbol and remark under the given policy. Pure;
/// out-of-range totals fall through to the lowest bucket.
pub fn grade_for(total: f64, policy: Policy) -> GradeRemark {
    match policy {
        Policy::Secondary => secondary_grade(total),
        Policy::Primary => GradeRemark {
            grade: None,
            remarks: primary_remarks(total),
        },
    }
}

/// One record of a cohort entering the rank pass.
#[derive(Debug, Clone)]
pub struct CohortEntry {
    pub record_id: String,
    pub total: f64,
}

/// Rank-pass output: position plus the policy-derived grade and remark.
#[derive(Debug, Clone)]
pub struct RankedEntry {
    pub record_id: String,
    pub total: f64,
    pub position: i64,
    pub grade: Option<&'static str>,
    pub remarks: &'static str,
}

/// Assign competition-style "1224" positions over a cohort and recompute
/// grade/remarks per the policy. Ties share a position; the next distinct
/// total takes its 1-based index in the sorted order, not previous rank + 1.
/// Published report cards depend on this exact scheme.
pub fn rank_cohort(mut entries: Vec<CohortEntry>, policy: Policy) -> Vec<RankedEntry> {
    entries.sort_by(|a, b| b.total.partial_cmp(&a.total).unwrap_or(Ordering::Equal));

    let mut ranked: Vec<RankedEntry> = Vec::with_capacity(entries.len());
    let mut prev_total = f64::NAN;
    let mut prev_position = 0_i64;
    for (i, entry) in entries.into_iter().enumerate() {
        let position = if i > 0 && entry.total == prev_total {
            prev_position
        } else {
            (i as i64) + 1
        };
        prev_total = entry.total;
        prev_position = position;

        let gr = grade_for(entry.total, policy);
        ranked.push(RankedEntry {
            record_id: entry.record_id,
            total: entry.total,
            position,
            grade: gr.grade,
            remarks: gr.remarks,
        });
    }
    ranked
}

/// 2-decimal rounding used on report-card percentages.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Percentage for one student in one term: sum of per-subject totals over
/// the obtainable (subjects x 100). None when the student has no records
/// for the term; a missing subject is excluded, never counted as zero.
pub fn cumulative_for_term(totals: &[f64]) -> Option<f64> {
    if totals.is_empty() {
        return None;
    }
    let obtained: f64 = totals.iter().sum();
    let obtainable = (totals.len() as f64) * 100.0;
    Some(round_off_2_decimals(obtained / obtainable * 100.0))
}

/// Per-term percentages collected across the year for display. Each term is
/// computed independently; this is not a running average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeSeries {
    pub first_term: Option<f64>,
    pub second_term: Option<f64>,
    pub third_term: Option<f64>,
}

pub fn cumulative_series(first: &[f64], second: &[f64], third: &[f64]) -> CumulativeSeries {
    CumulativeSeries {
        first_term: cumulative_for_term(first),
        second_term: cumulative_for_term(second),
        third_term: cumulative_for_term(third),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cohort(totals: &[f64]) -> Vec<CohortEntry> {
        totals
            .iter()
            .enumerate()
            .map(|(i, t)| CohortEntry {
                record_id: format!("r{}", i),
                total: *t,
            })
            .collect()
    }

    #[test]
    fn term_keys_round_trip_and_order() {
        for term in Term::ALL {
            assert_eq!(Term::from_key(term.as_key()), Some(term));
        }
        assert_eq!(Term::from_key("summerTerm"), None);
        assert!(Term::First < Term::Second && Term::Second < Term::Third);
    }

    #[test]
    fn classify_matches_known_level_patterns() {
        assert_eq!(classify("JSS1"), Some(Category::Jss));
        assert_eq!(classify("jss 3"), Some(Category::Jss));
        assert_eq!(classify("SS2"), Some(Category::Ss));
        assert_eq!(classify("Nursery1"), Some(Category::PreNursery));
        assert_eq!(classify("KG2"), Some(Category::PreNursery));
        assert_eq!(classify("Nursery2"), Some(Category::Primary));
        assert_eq!(classify("Primary4"), Some(Category::Primary));
        assert_eq!(classify("Basic 5"), Some(Category::Primary));
        assert_eq!(classify("Creche"), None);
    }

    #[test]
    fn category_map_defaults_unknown_labels_to_primary() {
        let map = CategoryMap::from_labels(["JSS1", "Primary3", "KG1"]);
        assert_eq!(map.resolve("JSS1"), (Category::Jss, true));
        assert_eq!(map.resolve("kg 1"), (Category::PreNursery, true));
        // Pattern fallback still applies for labels outside the configured list.
        assert_eq!(map.resolve("SS3"), (Category::Ss, true));
        assert_eq!(map.resolve("Creche"), (Category::Primary, false));
    }

    #[test]
    fn compute_total_sums_full_marks_to_100() {
        let c = ScoreComponents {
            weekly_test: 10.0,
            mid_term: 20.0,
            exam: 70.0,
        };
        assert_eq!(compute_total(&c, Category::Jss).unwrap(), 100.0);

        let p = ScoreComponents {
            weekly_test: 20.0,
            mid_term: 20.0,
            exam: 60.0,
        };
        assert_eq!(compute_total(&p, Category::Primary).unwrap(), 100.0);
    }

    #[test]
    fn compute_total_rejects_out_of_range_components() {
        let c = ScoreComponents {
            weekly_test: 25.0,
            mid_term: 0.0,
            exam: 0.0,
        };
        let err = compute_total(&c, Category::Jss).unwrap_err();
        assert_eq!(err.component, "weeklyTest");
        assert_eq!(err.max, 10.0);
        // Same components are fine under the primary bounds.
        assert!(compute_total(&c, Category::Primary).is_ok());

        let neg = ScoreComponents {
            weekly_test: 5.0,
            mid_term: -1.0,
            exam: 0.0,
        };
        assert_eq!(
            compute_total(&neg, Category::Ss).unwrap_err().component,
            "midTerm"
        );
    }

    #[test]
    fn secondary_policy_boundaries() {
        let cases = [
            (85.0, "A1", "Excellent"),
            (84.0, "B2", "Very Good"),
            (70.0, "B3", "Good"),
            (65.0, "C4", "Credit"),
            (60.0, "C5", "Credit"),
            (50.0, "C6", "Credit"),
            (45.0, "D7", "Pass"),
            (40.0, "E8", "Fair"),
            (39.9, "F9", "Fail"),
            (-5.0, "F9", "Fail"),
        ];
        for (total, grade, remarks) in cases {
            let gr = grade_for(total, Policy::Secondary);
            assert_eq!(gr.grade, Some(grade), "total {}", total);
            assert_eq!(gr.remarks, remarks, "total {}", total);
        }
    }

    #[test]
    fn secondary_buckets_never_improve_as_total_decreases() {
        let order = [
            "Excellent", "Very Good", "Good", "Credit", "Pass", "Fail",
        ];
        let severity = |r: &str| {
            // Fair sits between Pass and Fail.
            if r == "Fair" {
                return 9;
            }
            order.iter().position(|o| *o == r).unwrap() * 2
        };
        let mut prev = 0;
        let mut t = 100.0;
        while t >= 0.0 {
            let s = severity(grade_for(t, Policy::Secondary).remarks);
            assert!(s >= prev, "bucket improved at total {}", t);
            prev = s;
            t -= 0.5;
        }
    }

    #[test]
    fn primary_policy_boundaries() {
        let cases = [
            (90.0, "EXCELLENT"),
            (80.0, "V.GOOD"),
            (70.0, "GOOD"),
            (60.0, "U.CREDIT"),
            (51.0, "L.CREDIT"),
            (50.0, "AVERAGE"),
            (49.0, "FAIR"),
            (40.0, "FAIR"),
            (39.0, "POOR"),
        ];
        for (total, remarks) in cases {
            let gr = grade_for(total, Policy::Primary);
            assert_eq!(gr.grade, None, "total {}", total);
            assert_eq!(gr.remarks, remarks, "total {}", total);
        }
    }

    #[test]
    fn rank_ties_share_position_and_next_jumps() {
        let ranked = rank_cohort(cohort(&[90.0, 90.0, 80.0]), Policy::Secondary);
        let positions: Vec<i64> = ranked.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 1, 3]);

        let ranked = rank_cohort(cohort(&[70.0, 60.0, 60.0, 50.0]), Policy::Secondary);
        let positions: Vec<i64> = ranked.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 2, 4]);
    }

    #[test]
    fn rank_sorts_descending_regardless_of_input_order() {
        let ranked = rank_cohort(cohort(&[55.0, 91.0, 73.0]), Policy::Secondary);
        let totals: Vec<f64> = ranked.iter().map(|r| r.total).collect();
        assert_eq!(totals, vec![91.0, 73.0, 55.0]);
        assert_eq!(ranked[0].record_id, "r1");
    }

    #[test]
    fn rank_is_idempotent() {
        let entries = cohort(&[88.0, 42.0, 88.0, 61.0, 42.0]);
        let first = rank_cohort(entries.clone(), Policy::Secondary);
        let second = rank_cohort(entries, Policy::Secondary);
        let a: Vec<(String, i64)> = first
            .iter()
            .map(|r| (r.record_id.clone(), r.position))
            .collect();
        let b: Vec<(String, i64)> = second
            .iter()
            .map(|r| (r.record_id.clone(), r.position))
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn rank_empty_cohort_is_noop() {
        assert!(rank_cohort(Vec::new(), Policy::Secondary).is_empty());
    }

    #[test]
    fn rank_output_matches_independent_grading() {
        for ranked in rank_cohort(
            cohort(&[91.0, 67.5, 50.0, 12.0]),
            Policy::Secondary,
        ) {
            let gr = grade_for(ranked.total, Policy::Secondary);
            assert_eq!(ranked.grade, gr.grade);
            assert_eq!(ranked.remarks, gr.remarks);
        }
        for ranked in rank_cohort(cohort(&[50.0, 51.0, 49.0]), Policy::Primary) {
            let gr = grade_for(ranked.total, Policy::Primary);
            assert_eq!(ranked.grade, None);
            assert_eq!(ranked.remarks, gr.remarks);
        }
    }

    #[test]
    fn cumulative_for_term_is_null_without_records() {
        assert_eq!(cumulative_for_term(&[]), None);
    }

    #[test]
    fn cumulative_for_term_averages_subject_totals() {
        // 3 subjects, 240 obtained of 300 obtainable.
        assert_eq!(cumulative_for_term(&[80.0, 90.0, 70.0]), Some(80.0));
        assert_eq!(cumulative_for_term(&[55.0, 56.0]), Some(55.5));
        // Rounded to 2 decimals.
        assert_eq!(cumulative_for_term(&[70.0, 70.0, 71.0]), Some(70.33));
    }

    #[test]
    fn cumulative_series_terms_are_independent() {
        let series = cumulative_series(&[80.0, 60.0], &[], &[90.0]);
        assert_eq!(series.first_term, Some(70.0));
        assert_eq!(series.second_term, None);
        assert_eq!(series.third_term, Some(90.0));
    }
}
