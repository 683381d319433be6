//! Per-user semester → subject → topic hierarchy.
//!
//! The whole tree for one user is persisted as a single JSON document
//! (`{semesters:[{id,name,subjects:[{id,name,topics:[{id,name}]}]}]}`), so every
//! method here is a pure in-memory operation; persistence and concurrency are
//! handled by `services::user_documents`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::object::LocationRef;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Topic {
    pub id: Uuid,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Semester {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

/// Address of a single node in the tree.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum NodeRef {
    Semester {
        semester_id: Uuid,
    },
    Subject {
        semester_id: Uuid,
        subject_id: Uuid,
    },
    Topic {
        semester_id: Uuid,
        subject_id: Uuid,
        topic_id: Uuid,
    },
}

/// Outcome of a node lookup that failed part-way down the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingSegment {
    Semester(Uuid),
    Subject(Uuid),
    Topic(Uuid),
}

impl std::fmt::Display for MissingSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingSegment::Semester(id) => write!(f, "semester `{}`", id),
            MissingSegment::Subject(id) => write!(f, "subject `{}`", id),
            MissingSegment::Topic(id) => write!(f, "topic `{}`", id),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Hierarchy {
    #[serde(default)]
    pub semesters: Vec<Semester>,
}

impl Hierarchy {
    pub fn semester(&self, semester_id: Uuid) -> Result<&Semester, MissingSegment> {
        self.semesters
            .iter()
            .find(|s| s.id == semester_id)
            .ok_or(MissingSegment::Semester(semester_id))
    }

    fn semester_mut(&mut self, semester_id: Uuid) -> Result<&mut Semester, MissingSegment> {
        self.semesters
            .iter_mut()
            .find(|s| s.id == semester_id)
            .ok_or(MissingSegment::Semester(semester_id))
    }

    pub fn subject(&self, semester_id: Uuid, subject_id: Uuid) -> Result<&Subject, MissingSegment> {
        self.semester(semester_id)?
            .subjects
            .iter()
            .find(|s| s.id == subject_id)
            .ok_or(MissingSegment::Subject(subject_id))
    }

    fn subject_mut(
        &mut self,
        semester_id: Uuid,
        subject_id: Uuid,
    ) -> Result<&mut Subject, MissingSegment> {
        self.semester_mut(semester_id)?
            .subjects
            .iter_mut()
            .find(|s| s.id == subject_id)
            .ok_or(MissingSegment::Subject(subject_id))
    }

    pub fn topic(
        &self,
        semester_id: Uuid,
        subject_id: Uuid,
        topic_id: Uuid,
    ) -> Result<&Topic, MissingSegment> {
        self.subject(semester_id, subject_id)?
            .topics
            .iter()
            .find(|t| t.id == topic_id)
            .ok_or(MissingSegment::Topic(topic_id))
    }

    /// Add a semester unless one with the same id already exists.
    ///
    /// Returns `true` when the tree changed.
    pub fn insert_semester(&mut self, id: Uuid, name: &str) -> bool {
        if self.semesters.iter().any(|s| s.id == id) {
            return false;
        }
        self.semesters.push(Semester {
            id,
            name: name.to_string(),
            subjects: Vec::new(),
        });
        true
    }

    pub fn insert_subject(
        &mut self,
        semester_id: Uuid,
        id: Uuid,
        name: &str,
    ) -> Result<bool, MissingSegment> {
        let semester = self.semester_mut(semester_id)?;
        if semester.subjects.iter().any(|s| s.id == id) {
            return Ok(false);
        }
        semester.subjects.push(Subject {
            id,
            name: name.to_string(),
            topics: Vec::new(),
        });
        Ok(true)
    }

    pub fn insert_topic(
        &mut self,
        semester_id: Uuid,
        subject_id: Uuid,
        id: Uuid,
        name: &str,
    ) -> Result<bool, MissingSegment> {
        let subject = self.subject_mut(semester_id, subject_id)?;
        if subject.topics.iter().any(|t| t.id == id) {
            return Ok(false);
        }
        subject.topics.push(Topic {
            id,
            name: name.to_string(),
        });
        Ok(true)
    }

    /// Rename a node in place. Returns `false` if the name was already `name`.
    pub fn rename(&mut self, node: NodeRef, name: &str) -> Result<bool, MissingSegment> {
        let current = match node {
            NodeRef::Semester { semester_id } => &mut self.semester_mut(semester_id)?.name,
            NodeRef::Subject {
                semester_id,
                subject_id,
            } => &mut self.subject_mut(semester_id, subject_id)?.name,
            NodeRef::Topic {
                semester_id,
                subject_id,
                topic_id,
            } => {
                &mut self
                    .subject_mut(semester_id, subject_id)?
                    .topics
                    .iter_mut()
                    .find(|t| t.id == topic_id)
                    .ok_or(MissingSegment::Topic(topic_id))?
                    .name
            }
        };
        if current == name {
            return Ok(false);
        }
        *current = name.to_string();
        Ok(true)
    }

    /// Remove a node together with its subtree.
    pub fn remove(&mut self, node: NodeRef) -> Result<(), MissingSegment> {
        match node {
            NodeRef::Semester { semester_id } => {
                let before = self.semesters.len();
                self.semesters.retain(|s| s.id != semester_id);
                if self.semesters.len() == before {
                    return Err(MissingSegment::Semester(semester_id));
                }
            }
            NodeRef::Subject {
                semester_id,
                subject_id,
            } => {
                let semester = self.semester_mut(semester_id)?;
                let before = semester.subjects.len();
                semester.subjects.retain(|s| s.id != subject_id);
                if semester.subjects.len() == before {
                    return Err(MissingSegment::Subject(subject_id));
                }
            }
            NodeRef::Topic {
                semester_id,
                subject_id,
                topic_id,
            } => {
                let subject = self.subject_mut(semester_id, subject_id)?;
                let before = subject.topics.len();
                subject.topics.retain(|t| t.id != topic_id);
                if subject.topics.len() == before {
                    return Err(MissingSegment::Topic(topic_id));
                }
            }
        }
        Ok(())
    }

    /// Human-readable names along a partial or full path.
    pub fn resolve_path(
        &self,
        semester_id: Uuid,
        subject_id: Option<Uuid>,
        topic_id: Option<Uuid>,
    ) -> Result<Vec<String>, MissingSegment> {
        let semester = self.semester(semester_id)?;
        let mut names = vec![semester.name.clone()];

        let Some(subject_id) = subject_id else {
            return Ok(names);
        };
        let subject = semester
            .subjects
            .iter()
            .find(|s| s.id == subject_id)
            .ok_or(MissingSegment::Subject(subject_id))?;
        names.push(subject.name.clone());

        if let Some(topic_id) = topic_id {
            let topic = subject
                .topics
                .iter()
                .find(|t| t.id == topic_id)
                .ok_or(MissingSegment::Topic(topic_id))?;
            names.push(topic.name.clone());
        }
        Ok(names)
    }

    /// Check that a placement triple is nested correctly in this tree.
    pub fn contains(&self, location: &LocationRef) -> Result<(), MissingSegment> {
        self.topic(
            location.semester_id,
            location.subject_id,
            location.topic_id,
        )
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Hierarchy, Uuid, Uuid, Uuid) {
        let mut tree = Hierarchy::default();
        let (sem, sub, top) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        tree.insert_semester(sem, "2024");
        tree.insert_subject(sem, sub, "Math").unwrap();
        tree.insert_topic(sem, sub, top, "Algebra").unwrap();
        (tree, sem, sub, top)
    }

    #[test]
    fn insert_is_idempotent_on_id() {
        let mut tree = Hierarchy::default();
        let id = Uuid::new_v4();
        assert!(tree.insert_semester(id, "Fall"));
        assert!(!tree.insert_semester(id, "Fall"));
        assert!(tree.insert_semester(Uuid::new_v4(), "Fall"));
        assert_eq!(tree.semesters.len(), 2);
    }

    #[test]
    fn resolves_partial_and_full_paths() {
        let (tree, sem, sub, top) = sample();
        assert_eq!(tree.resolve_path(sem, None, None).unwrap(), vec!["2024"]);
        assert_eq!(
            tree.resolve_path(sem, Some(sub), Some(top)).unwrap(),
            vec!["2024", "Math", "Algebra"]
        );
        let missing = Uuid::new_v4();
        assert_eq!(
            tree.resolve_path(sem, Some(missing), Some(top)),
            Err(MissingSegment::Subject(missing))
        );
    }

    #[test]
    fn contains_requires_correct_nesting() {
        let (mut tree, sem, sub, top) = sample();
        let other_sem = Uuid::new_v4();
        tree.insert_semester(other_sem, "2025");

        assert!(
            tree.contains(&LocationRef {
                semester_id: sem,
                subject_id: sub,
                topic_id: top,
            })
            .is_ok()
        );
        assert_eq!(
            tree.contains(&LocationRef {
                semester_id: other_sem,
                subject_id: sub,
                topic_id: top,
            }),
            Err(MissingSegment::Subject(sub))
        );
    }

    #[test]
    fn rename_and_remove_leave_siblings_alone() {
        let (mut tree, sem, sub, top) = sample();
        let node = NodeRef::Topic {
            semester_id: sem,
            subject_id: sub,
            topic_id: top,
        };
        assert!(tree.rename(node, "Linear Algebra").unwrap());
        assert!(!tree.rename(node, "Linear Algebra").unwrap());
        assert_eq!(tree.topic(sem, sub, top).unwrap().name, "Linear Algebra");

        tree.remove(NodeRef::Subject {
            semester_id: sem,
            subject_id: sub,
        })
        .unwrap();
        assert!(tree.semester(sem).unwrap().subjects.is_empty());
        assert_eq!(tree.remove(node), Err(MissingSegment::Subject(sub)));
    }
}
