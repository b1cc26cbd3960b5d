use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use log::warn;
use serde::Serialize;

/// A legislative bill from the flat-text catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bill {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Bill {
    /// Parse one catalog line:
    /// `B<NNN>: <title> — <description>. [<category>]`
    /// with the bracketed category optional.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (id, rest) = line.split_once(':')?;
        let id = id.trim();
        let digits = id.strip_prefix('B')?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let mut rest = rest.trim();

        let category = match rest.rfind(" [") {
            Some(at) if rest.ends_with(']') => {
                let cat = rest[at + 2..rest.len() - 1].to_string();
                rest = rest[..at].trim_end();
                Some(cat)
            }
            _ => None,
        };

        let (title, description) = rest.split_once(" — ")?;
        let description = description.strip_suffix('.').unwrap_or(description);

        Some(Self {
            id: id.into(),
            title: title.trim().into(),
            description: description.trim().into(),
            category,
        })
    }

    fn number(&self) -> u32 {
        self.id[1..].parse().unwrap_or(0)
    }

    fn to_line(&self) -> String {
        match &self.category {
            Some(cat) => format!("{}: {} — {}. [{}]", self.id, self.title, self.description, cat),
            None => format!("{}: {} — {}.", self.id, self.title, self.description),
        }
    }
}

/// The bill catalog file. Bills live outside the JSON store, one line per
/// bill; admins may append but never edit or remove lines.
pub struct Catalog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Catalog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// All parseable bills, in file order. A missing catalog file is an
    /// empty catalog; malformed lines are skipped.
    pub fn bills(&self) -> io::Result<Vec<Bill>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.bills_unlocked()
    }

    fn bills_unlocked(&self) -> io::Result<Vec<Bill>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        let mut bills = vec![];
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match Bill::parse_line(&line) {
                Some(bill) => bills.push(bill),
                None => warn!("skipping malformed bill line: {line:?}"),
            }
        }

        Ok(bills)
    }

    /// Append a new bill, allocating the next id after the highest in the
    /// file.
    pub fn append(
        &self,
        title: &str,
        description: &str,
        category: Option<&str>,
    ) -> io::Result<Bill> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let next = self
            .bills_unlocked()?
            .iter()
            .map(Bill::number)
            .max()
            .unwrap_or(0)
            + 1;

        let bill = Bill {
            id: format!("B{next:03}"),
            title: title.into(),
            description: description.into(),
            category: category.map(Into::into),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", bill.to_line())?;

        Ok(bill)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_line_with_category() {
        let bill = Bill::parse_line("B001: Clean Air Act — Reduces emissions. [Environment]")
            .unwrap();

        assert_eq!(bill.id, "B001");
        assert_eq!(bill.title, "Clean Air Act");
        assert_eq!(bill.description, "Reduces emissions");
        assert_eq!(bill.category.as_deref(), Some("Environment"));
    }

    #[test]
    fn parses_line_without_category() {
        let bill = Bill::parse_line("B017: Transit Funding — Expands bus routes.").unwrap();

        assert_eq!(bill.id, "B017");
        assert_eq!(bill.category, None);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(Bill::parse_line(""), None);
        assert_eq!(Bill::parse_line("not a bill"), None);
        assert_eq!(Bill::parse_line("X001: Wrong prefix — Nope."), None);
        assert_eq!(Bill::parse_line("B00x: Bad digits — Nope."), None);
        assert_eq!(Bill::parse_line("B001: No dash separator."), None);
    }

    #[test]
    fn catalog_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("billsList.txt");
        std::fs::write(
            &path,
            "B001: First — One.\ngarbage line\nB002: Second — Two. [Tax]\n",
        )
        .unwrap();

        let catalog = Catalog::new(path);
        let bills = catalog.bills().unwrap();
        assert_eq!(bills.len(), 2);
        assert_eq!(bills[1].id, "B002");
        assert_eq!(bills[1].category.as_deref(), Some("Tax"));
    }

    #[test]
    fn missing_catalog_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new(dir.path().join("absent.txt"));
        assert_eq!(catalog.bills().unwrap(), vec![]);
    }

    #[test]
    fn append_allocates_next_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("billsList.txt");
        std::fs::write(&path, "B041: Old Bill — Exists.\n").unwrap();

        let catalog = Catalog::new(path);
        let bill = catalog
            .append("New Bill", "Does things", Some("Housing"))
            .unwrap();
        assert_eq!(bill.id, "B042");

        let bills = catalog.bills().unwrap();
        assert_eq!(bills.len(), 2);
        assert_eq!(bills[1], bill);
    }

    #[test]
    fn append_to_empty_catalog_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new(dir.path().join("billsList.txt"));

        let bill = catalog.append("First", "Ever", None).unwrap();
        assert_eq!(bill.id, "B001");
    }
}
