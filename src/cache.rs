//! Questions asked on the link and answers seen on it.

use std::collections::HashMap;
use std::time::Duration;

use crate::message::RecordType;
use crate::name::Name;
use crate::record::{Answer, Question};

/// Cache-flush answers only replace records older than this.
pub const CACHE_FLUSH_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct Cache {
    /// name -> type -> the question being asked
    pub(crate) asked: HashMap<Name, HashMap<RecordType, Question>>,
    /// name -> type -> answers, in order of caching
    pub(crate) cached: HashMap<Name, HashMap<RecordType, Vec<Answer>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `question` unless the same (name, type) is already being asked.
    /// Returns the inserted question, or `None` when it should not be sent again.
    pub fn add_question(&mut self, question: Question) -> Option<&Question> {
        let types = self.asked.entry(question.name.clone()).or_default();
        match types.entry(question.rtype) {
            std::collections::hash_map::Entry::Occupied(_) => None,
            std::collections::hash_map::Entry::Vacant(e) => Some(e.insert(question)),
        }
    }

    /// Note that (name, type) was asked again, by us or by another host.
    pub fn cache_question(&mut self, name: &Name, rtype: RecordType) -> Option<&Question> {
        let question = self.asked.get_mut(name)?.get_mut(&rtype)?;
        question.update();
        Some(question)
    }

    pub fn question(&self, name: &Name, rtype: RecordType) -> Option<&Question> {
        self.asked.get(name)?.get(&rtype)
    }

    /// Cache `answer`. Returns it when it is news to report to subscribers, `None` when
    /// it only repeats what is already known.
    pub fn cache_answer(&mut self, answer: Answer) -> Option<Answer> {
        let answers = self
            .cached
            .entry(answer.name.clone())
            .or_default()
            .entry(answer.rtype())
            .or_default();

        if answer.cache_flush {
            // identical data is kept so that it does not look new
            answers
                .retain(|a| a.arrival + CACHE_FLUSH_GRACE >= answer.arrival || a.data == answer.data);
        }

        let old = answers
            .iter()
            .position(|a| a.name == answer.name && a.data == answer.data);
        match old {
            None => {
                answers.push(answer.clone());
                Some(answer)
            }
            Some(i) if answer.is_goodbye() != answers[i].is_goodbye() => {
                // a removal, or a record coming back after one
                answers.remove(i);
                answers.push(answer.clone());
                Some(answer)
            }
            Some(i) if answer.expiry() > answers[i].expiry() => {
                answers.remove(i);
                answers.push(answer);
                None
            }
            Some(_) => None,
        }
    }

    /// Unexpired answers for (name, type). The name `*` matches every name, `ANY` every type.
    pub fn answers_for(&self, name: &Name, rtype: RecordType) -> Vec<Answer> {
        let mut out = Vec::new();
        if name.is_wildcard() {
            for types in self.cached.values() {
                collect(types, rtype, &mut out);
            }
        } else if let Some(types) = self.cached.get(name) {
            collect(types, rtype, &mut out);
        }
        out
    }

    /// True when (name, type) or (name, ANY) is already being asked. Always true for `*`.
    pub fn is_asked(&self, name: &Name, rtype: RecordType) -> bool {
        if name.is_wildcard() {
            return true;
        }
        match self.asked.get(name) {
            Some(types) => types.contains_key(&rtype) || types.contains_key(&RecordType::Any),
            None => false,
        }
    }

    pub fn answer_count(&self) -> usize {
        self.cached
            .values()
            .flat_map(|types| types.values())
            .map(Vec::len)
            .sum()
    }

    pub fn question_count(&self) -> usize {
        self.asked.values().map(HashMap::len).sum()
    }
}

fn collect(types: &HashMap<RecordType, Vec<Answer>>, rtype: RecordType, out: &mut Vec<Answer>) {
    let now = tokio::time::Instant::now();
    let matching = types
        .iter()
        .filter(|(t, _)| rtype == RecordType::Any || **t == rtype)
        .flat_map(|(_, answers)| answers.iter());
    out.extend(matching.filter(|a| !a.expired_at(now)).cloned());
}
