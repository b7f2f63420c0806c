use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ScoreError;

/// Formats an aspect's named fields for reports.
pub trait FieldHolder: Send + Sync {
    fn field_str(&self, name: &str) -> Result<String, ScoreError>;
}

/// One aspect's contribution to an item.
#[derive(Clone)]
pub struct Profile {
    pub score: f64,
    pub fields: Arc<dyn FieldHolder>,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile").field("score", &self.score).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Item {
    pub code: String,
    pub name: String,
    /// Total score across all aspects
    pub score: f64,
    pub comments: Vec<String>,
    pub profiles: HashMap<String, Profile>,
}

impl Item {
    pub fn new(code: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn cmt(&mut self, c: impl Into<String>) {
        self.comments.push(c.into());
    }

    pub fn cmtf(&mut self, args: fmt::Arguments<'_>) {
        self.comments.push(args.to_string());
    }

    /// Comments as one cell: a single comment verbatim, several numbered per line.
    pub fn comment_text(&self) -> String {
        match self.comments.len() {
            0 => String::new(),
            1 => self.comments[0].clone(),
            _ => self
                .comments
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{}.{}", i + 1, c))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Formatted field of one aspect. An item without that aspect yields "".
    pub fn field(&self, aspect: &str, name: &str) -> Result<String, ScoreError> {
        match self.profiles.get(aspect) {
            Some(p) => p.fields.field_str(name),
            None => Ok(String::new()),
        }
    }
}

/// Ranked items of one or more scoring aspects.
#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub items: Vec<Item>,
    index: HashMap<String, usize>,
    pub profile_ids: Vec<String>,
    /// Weight of each combined result, parallel to the order they were combined in
    pub profile_weights: Vec<f64>,
    /// Weight of this result when combined into a parent
    pub weight: f64,
    pub fields: HashMap<String, Vec<String>>,
}

impl Default for ScoreResult {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            profile_ids: Vec::new(),
            profile_weights: Vec::new(),
            weight: 1.0,
            fields: HashMap::new(),
        }
    }
}

impl ScoreResult {
    pub fn new(profile_id: &str) -> Self {
        Self {
            profile_ids: vec![profile_id.to_string()],
            ..Default::default()
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn add_item(&mut self, item: Item) {
        self.index.insert(item.code.clone(), self.items.len());
        self.items.push(item);
    }

    pub fn get(&self, code: &str) -> Option<&Item> {
        self.index.get(code).map(|&i| &self.items[i])
    }

    pub fn codes(&self) -> Vec<String> {
        self.items.iter().map(|i| i.code.clone()).collect()
    }

    pub fn set_fields(&mut self, profile_id: &str, fields: &[&str]) {
        self.fields.insert(
            profile_id.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
    }

    /// Descending by total score.
    pub fn sort(&mut self) -> &mut Self {
        self.items.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.reindex();
        self
    }

    /// Keep the first `n` items; negative or oversized `n` leaves everything.
    pub fn shrink(&mut self, n: isize) -> &mut Self {
        if n >= 0 && (n as usize) < self.items.len() {
            self.items.truncate(n as usize);
            self.reindex();
        }
        self
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(i, it)| (it.code.clone(), i))
            .collect();
    }

    /// Merge results by code, scaling each result's item scores by its weight.
    pub fn combine(results: Vec<ScoreResult>) -> Result<ScoreResult, ScoreError> {
        let mut fr = ScoreResult {
            weight: 0.0,
            ..Default::default()
        };

        for r in results {
            fr.profile_ids.extend(r.profile_ids.iter().cloned());
            fr.profile_weights.push(r.weight);
            fr.weight += r.weight;

            for (pfid, fields) in r.fields {
                if fr.fields.contains_key(&pfid) {
                    return Err(ScoreError::DuplicateProfile(pfid));
                }
                fr.fields.insert(pfid, fields);
            }

            for mut it in r.items {
                it.score *= r.weight;
                match fr.index.get(&it.code).copied() {
                    Some(i) => {
                        let merged = &mut fr.items[i];
                        merged.score += it.score;
                        for (pfid, profile) in it.profiles {
                            if merged.profiles.contains_key(&pfid) {
                                return Err(ScoreError::DuplicateAspect {
                                    code: it.code.clone(),
                                    profile: pfid,
                                });
                            }
                            merged.profiles.insert(pfid, profile);
                        }
                        merged.comments.extend(it.comments);
                    }
                    None => fr.add_item(it),
                }
            }
        }
        Ok(fr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl FieldHolder for Fixed {
        fn field_str(&self, name: &str) -> Result<String, ScoreError> {
            match name {
                "X" => Ok(self.0.to_string()),
                _ => Err(ScoreError::UnknownField {
                    aspect: "FIXED".to_string(),
                    field: name.to_string(),
                }),
            }
        }
    }

    fn item(code: &str, score: f64, aspect: &str) -> Item {
        let mut it = Item::new(code, code);
        it.score = score;
        it.profiles.insert(
            aspect.to_string(),
            Profile {
                score,
                fields: Arc::new(Fixed("x")),
            },
        );
        it
    }

    fn result(aspect: &str, weight: f64, items: Vec<Item>) -> ScoreResult {
        let mut r = ScoreResult::new(aspect).with_weight(weight);
        r.set_fields(aspect, &["X"]);
        for it in items {
            r.add_item(it);
        }
        r
    }

    #[test]
    fn weighted_combine_sums_by_code() {
        let a = result("KDJV", 0.6, vec![item("600000", 80.0, "KDJV")]);
        let b = result("HIST", 0.4, vec![item("600000", 50.0, "HIST"), item("000001", 10.0, "HIST")]);
        let fr = ScoreResult::combine(vec![a, b]).unwrap();

        let merged = fr.get("600000").unwrap();
        assert!((merged.score - 68.0).abs() < 1e-9);
        assert_eq!(merged.profiles.len(), 2);
        assert!((fr.get("000001").unwrap().score - 4.0).abs() < 1e-9);
        assert_eq!(fr.profile_ids, vec!["KDJV".to_string(), "HIST".to_string()]);
        assert!((fr.weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn duplicate_aspect_is_fatal() {
        let a = result("KDJV", 0.5, vec![item("600000", 80.0, "KDJV")]);
        let mut b = ScoreResult::new("OTHER").with_weight(0.5);
        b.add_item(item("600000", 50.0, "KDJV"));
        let err = ScoreResult::combine(vec![a, b]).unwrap_err();
        assert!(matches!(err, ScoreError::DuplicateAspect { ref code, .. } if code == "600000"));
    }

    #[test]
    fn duplicate_field_list_is_fatal() {
        let a = result("KDJV", 0.5, vec![]);
        let b = result("KDJV", 0.5, vec![]);
        assert!(matches!(
            ScoreResult::combine(vec![a, b]),
            Err(ScoreError::DuplicateProfile(ref p)) if p == "KDJV"
        ));
    }

    #[test]
    fn sort_and_shrink() {
        let mut r = result(
            "KDJV",
            1.0,
            vec![item("a", 10.0, "KDJV"), item("b", 30.0, "KDJV"), item("c", 20.0, "KDJV")],
        );
        r.sort();
        assert_eq!(r.codes(), vec!["b", "c", "a"]);
        r.shrink(-1);
        assert_eq!(r.len(), 3);
        r.shrink(5);
        assert_eq!(r.len(), 3);
        r.shrink(2);
        assert_eq!(r.codes(), vec!["b", "c"]);
        assert!(r.get("a").is_none());
        assert_eq!(r.get("c").unwrap().score, 20.0);
    }

    #[test]
    fn field_lookup_and_comments() {
        let mut it = item("600000", 1.0, "KDJV");
        assert_eq!(it.field("KDJV", "X").unwrap(), "x");
        assert!(it.field("KDJV", "Y").is_err());
        assert_eq!(it.field("NONE", "X").unwrap(), "");

        it.cmt("thin history");
        assert_eq!(it.comment_text(), "thin history");
        it.cmtf(format_args!("dod {:.1}", 42.0));
        assert_eq!(it.comment_text(), "1.thin history\n2.dod 42.0");
    }
}
