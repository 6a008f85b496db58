use anyhow::{anyhow, Context, Result};
use serde_json::{json, Map, Value};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader},
};

use crate::protocol::Record;
use crate::scheduler::WorkCombiner;

/// Tokeniza y suma al acumulador: sólo alfanumérico y '_', en minúscula.
pub fn count_words(text: &str, counts: &mut BTreeMap<String, u64>) {
    for raw in text.split_whitespace() {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_lowercase();

        if !cleaned.is_empty() {
            *counts.entry(cleaned).or_insert(0) += 1;
        }
    }
}

/// Handler de la subtarea CountWords.
/// El item es {"text": "..."} o {"path": "/data/input/x.txt"}.
/// Devuelve un objeto palabra -> conteo.
pub fn count_item(item: &Record) -> Result<Record> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();

    if let Some(text) = item.get("text").and_then(|v| v.as_str()) {
        count_words(text, &mut counts);
    } else if let Some(path) = item.get("path").and_then(|v| v.as_str()) {
        let file = File::open(path).with_context(|| format!("no se pudo abrir {}", path))?;
        let reader = BufReader::new(file);
        for line in reader.lines() {
            let line = line.with_context(|| format!("error leyendo {}", path))?;
            count_words(&line, &mut counts);
        }
    } else {
        return Err(anyhow!("item sin 'text' ni 'path': {}", item));
    }

    Ok(to_record(&counts))
}

fn to_record(counts: &BTreeMap<String, u64>) -> Record {
    let map: Map<String, Value> = counts
        .iter()
        .map(|(k, v)| (k.clone(), json!(v)))
        .collect();
    Value::Object(map)
}

/// Junta los conteos parciales de cada unidad en un único mapa ordenado.
#[derive(Debug, Default)]
pub struct WordCountCombiner {
    totals: BTreeMap<String, u64>,
    items: usize,
}

impl WorkCombiner for WordCountCombiner {
    fn work_unit_complete(&mut self, _item: &Record, results: Record) {
        self.items += 1;
        if let Some(obj) = results.as_object() {
            for (word, count) in obj {
                *self.totals.entry(word.clone()).or_insert(0) += count.as_u64().unwrap_or(0);
            }
        }
    }

    fn work_complete(&mut self) -> Record {
        json!({
            "items": self.items,
            "counts": to_record(&self.totals),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir()
            .join("wordcount_item_tests")
            .join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    /// Caso feliz: texto con mayúsculas, signos, etc.
    #[test]
    fn count_item_normalizes_tokens() {
        let out = count_item(&json!({"text": "Hola hola, mundo!! mundo   mundo_prueba"})).unwrap();
        assert_eq!(out, json!({"hola": 2, "mundo": 2, "mundo_prueba": 1}));
    }

    #[test]
    fn count_item_reads_files() {
        let tmp = temp_dir("file");
        let input_path = tmp.join("input.txt");

        let mut f = fs::File::create(&input_path).unwrap();
        writeln!(f, "test test").unwrap();
        writeln!(f, "otro").unwrap();

        let out = count_item(&json!({"path": input_path.to_str().unwrap()})).unwrap();
        assert_eq!(out, json!({"otro": 1, "test": 2}));
    }

    /// Archivo inexistente o item mal formado: Err.
    #[test]
    fn count_item_errors_on_missing_input() {
        let tmp = temp_dir("missing");
        let input_path = tmp.join("no_existe.txt");

        assert!(count_item(&json!({"path": input_path.to_str().unwrap()})).is_err());
        assert!(count_item(&json!({"otra_cosa": 1})).is_err());
    }

    #[test]
    fn empty_text_gives_empty_counts() {
        assert_eq!(count_item(&json!({"text": "  ,, "})).unwrap(), json!({}));
    }

    #[test]
    fn combiner_sums_partial_counts() {
        let mut c = WordCountCombiner::default();
        c.work_unit_complete(&json!({"text": "a b"}), json!({"a": 1, "b": 1}));
        c.work_unit_complete(&json!({"text": "b"}), json!({"b": 1}));

        let out = c.work_complete();
        assert_eq!(out["items"], 2);
        assert_eq!(out["counts"], json!({"a": 1, "b": 2}));
    }
}
