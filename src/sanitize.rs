//! Policy-driven removal of active content

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use log::{debug, info, trace, warn};

use crate::config::Context;
use crate::document::Document;
use crate::error::{PdfError, PdfResult};
use crate::pdf::{Dictionary, Object, ObjectId};

/// Categories of active content to strip
///
/// Each flag applies on its own to every matching structure the walk
/// reaches; stripping one category never removes another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SanitizePolicy {
    /// JavaScript actions and the document-level JavaScript name tree
    pub javascript: bool,
    pub uri: bool,
    /// Navigation inside the document
    pub goto: bool,
    /// Navigation to other files, `GoToR` and `GoToE`
    pub goto_remote: bool,
    pub launch: bool,
    /// The catalog's `/OpenAction`, whatever it holds
    pub open_action: bool,
    /// `/JS` entries of rendition actions
    pub rendition_js: bool,
}

impl SanitizePolicy {
    /// Strip every category
    pub fn all() -> Self {
        Self {
            javascript: true,
            uri: true,
            goto: true,
            goto_remote: true,
            launch: true,
            open_action: true,
            rendition_js: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn strips(&self, kind: ActionKind) -> bool {
        match kind {
            ActionKind::JavaScript => self.javascript,
            ActionKind::Uri => self.uri,
            ActionKind::GoTo => self.goto,
            ActionKind::GoToRemote => self.goto_remote,
            ActionKind::Launch => self.launch,
            ActionKind::OpenAction => self.open_action,
            ActionKind::RenditionJs => self.rendition_js,
        }
    }
}

/// What a removed structure was
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    JavaScript,
    Uri,
    GoTo,
    GoToRemote,
    Launch,
    OpenAction,
    RenditionJs,
}

impl ActionKind {
    /// Category of an action dictionary, from its `/S` entry
    pub fn of_action(action: &Dictionary) -> Option<Self> {
        match action.get_name("S")? {
            "JavaScript" => Some(ActionKind::JavaScript),
            "URI" => Some(ActionKind::Uri),
            "GoTo" => Some(ActionKind::GoTo),
            "GoToR" | "GoToE" => Some(ActionKind::GoToRemote),
            "Launch" => Some(ActionKind::Launch),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::JavaScript => "JavaScript",
            ActionKind::Uri => "URI",
            ActionKind::GoTo => "GoTo",
            ActionKind::GoToRemote => "GoToRemote",
            ActionKind::Launch => "Launch",
            ActionKind::OpenAction => "OpenAction",
            ActionKind::RenditionJs => "RenditionJS",
        };
        f.write_str(name)
    }
}

/// Outcome of a sanitization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    /// Objects edited by this pass
    pub modified: BTreeSet<ObjectId>,
    /// Structures removed per category
    pub removed: BTreeMap<ActionKind, usize>,
    /// Page tree nodes that point back to an ancestor
    pub cycles: Vec<ObjectId>,
    /// Number of indirect objects walked
    pub visited: usize,
}

impl SanitizeReport {
    pub fn removed(&self, kind: ActionKind) -> usize {
        self.removed.get(&kind).copied().unwrap_or(0)
    }

    /// Total number of structures removed
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }

    /// True when the pass changed nothing
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty()
    }
}

/// How a dictionary is treated beyond the generic action keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Catalog,
    /// The catalog's `/Names` dictionary
    Names,
    /// An `/AA` trigger dictionary
    AdditionalActions,
    Other,
}

/// Keys holding a single action
const ACTION_KEYS: [&str; 2] = ["A", "OpenAction"];

struct Walker<'p> {
    policy: &'p SanitizePolicy,
    report: SanitizeReport,
    failed: Vec<ObjectId>,
    roles: HashMap<ObjectId, Role>,
    queue: VecDeque<ObjectId>,
}

impl<'p> Walker<'p> {
    fn new(policy: &'p SanitizePolicy) -> Self {
        Self {
            policy,
            report: SanitizeReport::default(),
            failed: Vec::new(),
            roles: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    fn count(&mut self, kind: ActionKind) {
        *self.report.removed.entry(kind).or_insert(0) += 1;
    }

    /// Category of the action behind `value` when the policy strips it
    fn stripped_kind(&mut self, doc: &Document, current: ObjectId, value: &Object) -> Option<ActionKind> {
        let action = match value {
            Object::Dictionary(action) => action,
            // The holder itself is detached while it is edited
            Object::Reference(id) if *id == current => return None,
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(Object::Dictionary(action)) => action,
                Ok(_) => return None,
                Err(_) => {
                    warn!("Action {} referenced from {} does not exist", id, current);
                    self.failed.push(*id);
                    return None;
                }
            },
            _ => return None,
        };
        ActionKind::of_action(action).filter(|kind| self.policy.strips(*kind))
    }

    fn clean_dictionary(&mut self, doc: &Document, current: ObjectId, dict: &mut Dictionary, role: Role) -> bool {
        let mut changed = false;

        match role {
            Role::Catalog => {
                if self.policy.open_action && dict.remove("OpenAction").is_some() {
                    self.count(ActionKind::OpenAction);
                    changed = true;
                }
                if let Some(Object::Reference(names)) = dict.get("Names") {
                    self.roles.insert(*names, Role::Names);
                }
            }
            Role::Names => {
                if self.policy.javascript && dict.remove("JavaScript").is_some() {
                    self.count(ActionKind::JavaScript);
                    changed = true;
                }
            }
            Role::AdditionalActions => {
                let triggers: Vec<Vec<u8>> = dict.iter().map(|(key, _)| key.clone()).collect();
                for trigger in triggers {
                    let key = String::from_utf8_lossy(&trigger).into_owned();
                    let kind = dict.get(&key).and_then(|value| self.stripped_kind(doc, current, value));
                    if let Some(kind) = kind {
                        dict.remove(&key);
                        self.count(kind);
                        changed = true;
                    }
                }
            }
            Role::Other => {}
        }

        for key in ACTION_KEYS {
            let kind = dict.get(key).and_then(|value| self.stripped_kind(doc, current, value));
            if let Some(kind) = kind {
                trace!("Removing /{} {} action from {}", key, kind, current);
                dict.remove(key);
                self.count(kind);
                changed = true;
            }
        }

        changed |= self.clean_next(doc, current, dict);

        if self.policy.rendition_js && dict.get_name("S") == Some("Rendition") && dict.remove("JS").is_some() {
            self.count(ActionKind::RenditionJs);
            changed = true;
        }

        for (key, value) in dict.iter_mut() {
            let child_role = match key.as_slice() {
                b"AA" => Role::AdditionalActions,
                b"Names" if role == Role::Catalog => Role::Names,
                _ => Role::Other,
            };
            changed |= self.clean_value(doc, current, value, child_role);
        }
        changed
    }

    /// Filter an action's `/Next` entry, a single action or an array
    fn clean_next(&mut self, doc: &Document, current: ObjectId, dict: &mut Dictionary) -> bool {
        let kinds: Vec<Option<ActionKind>> = match dict.get("Next") {
            Some(Object::Array(items)) => items
                .iter()
                .map(|item| self.stripped_kind(doc, current, item))
                .collect(),
            Some(single) => vec![self.stripped_kind(doc, current, single)],
            None => return false,
        };
        let stripped: Vec<ActionKind> = kinds.iter().flatten().copied().collect();
        if stripped.is_empty() {
            return false;
        }
        for kind in &stripped {
            self.count(*kind);
        }

        match dict.get_mut("Next") {
            Some(Object::Array(items)) => {
                let mut keep = kinds.iter();
                items.retain(|_| keep.next().map_or(true, Option::is_none));
                if items.is_empty() {
                    dict.remove("Next");
                }
            }
            _ => {
                dict.remove("Next");
            }
        }
        true
    }

    fn clean_value(&mut self, doc: &Document, current: ObjectId, value: &mut Object, role: Role) -> bool {
        match value {
            Object::Dictionary(dict) => self.clean_dictionary(doc, current, dict, role),
            Object::Stream(stream) => self.clean_dictionary(doc, current, &mut stream.dict, role),
            Object::Array(items) => {
                let mut changed = false;
                for item in items.iter_mut() {
                    changed |= self.clean_value(doc, current, item, Role::Other);
                }
                changed
            }
            Object::Reference(id) => {
                if role != Role::Other {
                    self.roles.entry(*id).or_insert(role);
                }
                self.queue.push_back(*id);
                false
            }
            _ => false,
        }
    }
}

/// Strip the categories selected by `policy` from everything reachable from
/// the catalog
///
/// The walk checks `ctx.cancel` at every object. A cancelled or failed pass
/// leaves the document marked incomplete so it cannot be written.
pub fn sanitize(doc: &mut Document, policy: &SanitizePolicy, ctx: &Context) -> PdfResult<SanitizeReport> {
    let catalog = doc.catalog_id()?;
    doc.get_object(catalog)?;

    let mut walker = Walker::new(policy);
    if let Ok((_, Some(node))) = doc.walk_page_tree() {
        warn!("Page tree node {} points back to an ancestor", node);
        walker.report.cycles.push(node);
    }

    walker.roles.insert(catalog, Role::Catalog);
    walker.queue.push_back(catalog);
    let mut visited = HashSet::new();

    while let Some(id) = walker.queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        if let Err(err) = ctx.cancel.check() {
            doc.mark_incomplete("sanitize");
            return Err(err);
        }

        let mut object = match doc.take_object(id) {
            Some(object) => object,
            None => {
                debug!("Skipping missing object {}", id);
                continue;
            }
        };
        let role = walker.roles.get(&id).copied().unwrap_or(Role::Other);
        let changed = walker.clean_value(doc, id, &mut object, role);
        doc.restore_object(id, object, changed);

        walker.report.visited += 1;
        if changed {
            walker.report.modified.insert(id);
        }
    }

    if !walker.failed.is_empty() {
        let mut failed = walker.failed;
        failed.sort();
        failed.dedup();
        doc.mark_incomplete("sanitize");
        return Err(PdfError::SanitizationFailed { failed });
    }

    info!(
        "Sanitized {} objects: {} structures removed from {} objects",
        walker.report.visited,
        walker.report.total_removed(),
        walker.report.modified.len()
    );
    Ok(walker.report)
}

impl Document {
    /// See [`sanitize`]
    pub fn sanitize(&mut self, policy: &SanitizePolicy, ctx: &Context) -> PdfResult<SanitizeReport> {
        sanitize(self, policy, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CancellationToken;
    use crate::dictionary;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn link(doc: &mut Document, action: Dictionary) -> PdfResult<ObjectId> {
        let page = doc.add_page(b"".to_vec(), None)?;
        let annot = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(10), Object::Integer(10)],
            "A" => action,
        });
        doc.get_dictionary_mut(page.id)?.set("Annots", vec![Object::Reference(annot)]);
        Ok(annot)
    }

    #[test_log::test]
    fn test_strips_javascript_open_action() -> PdfResult<()> {
        let mut doc = Document::new();
        doc.add_javascript_open_action("app.alert(1);")?;
        let ctx = Context::default();

        let report = sanitize(&mut doc, &SanitizePolicy::all(), &ctx)?;
        assert_eq!(report.removed(ActionKind::OpenAction), 1);
        assert_eq!(report.removed(ActionKind::JavaScript), 1);

        let catalog = doc.catalog()?;
        assert!(!catalog.has("OpenAction"));
        let names = doc.resolve_dict(catalog.get("Names").ok_or(PdfError::MissingDictionaryEntry("Names".into()))?)?;
        assert!(!names.has("JavaScript"));
        Ok(())
    }

    #[test_log::test]
    fn test_second_pass_changes_nothing() -> PdfResult<()> {
        let mut doc = Document::new();
        doc.add_javascript_open_action("app.alert(1);")?;
        link(&mut doc, dictionary! { "S" => "URI", "URI" => Object::string_literal("http://x") })?;
        let ctx = Context::default();

        let first = sanitize(&mut doc, &SanitizePolicy::all(), &ctx)?;
        assert!(!first.is_clean());
        let second = sanitize(&mut doc, &SanitizePolicy::all(), &ctx)?;
        assert!(second.is_clean());
        assert_eq!(second.total_removed(), 0);
        Ok(())
    }

    #[rstest]
    #[case("URI", SanitizePolicy { uri: true, ..SanitizePolicy::none() }, true)]
    #[case("URI", SanitizePolicy { goto: true, ..SanitizePolicy::none() }, false)]
    #[case("GoTo", SanitizePolicy { goto: true, ..SanitizePolicy::none() }, true)]
    #[case("GoToE", SanitizePolicy { goto_remote: true, ..SanitizePolicy::none() }, true)]
    #[case("GoToR", SanitizePolicy { goto: true, ..SanitizePolicy::none() }, false)]
    #[case("Launch", SanitizePolicy { launch: true, ..SanitizePolicy::none() }, true)]
    #[case("Launch", SanitizePolicy::none(), false)]
    fn test_link_actions(#[case] kind: &str, #[case] policy: SanitizePolicy, #[case] stripped: bool) -> PdfResult<()> {
        let mut doc = Document::new();
        let annot = link(&mut doc, dictionary! { "S" => kind })?;

        sanitize(&mut doc, &policy, &Context::default())?;
        assert_eq!(!doc.get_dictionary(annot)?.has("A"), stripped);
        Ok(())
    }

    #[test_log::test]
    fn test_flags_apply_independently() -> PdfResult<()> {
        let mut doc = Document::new();
        let action = doc.add_javascript_open_action("go();")?;
        let policy = SanitizePolicy {
            launch: true,
            ..SanitizePolicy::none()
        };

        let report = sanitize(&mut doc, &policy, &Context::default())?;
        assert!(report.is_clean());
        assert_eq!(doc.catalog()?.get_reference("OpenAction"), Some(action));
        Ok(())
    }

    #[test_log::test]
    fn test_javascript_flag_reaches_open_action() -> PdfResult<()> {
        let mut doc = Document::new();
        doc.add_javascript_open_action("go();")?;
        let policy = SanitizePolicy {
            javascript: true,
            ..SanitizePolicy::none()
        };

        let report = sanitize(&mut doc, &policy, &Context::default())?;
        assert_eq!(report.removed(ActionKind::JavaScript), 2);
        assert_eq!(report.removed(ActionKind::OpenAction), 0);
        assert!(!doc.catalog()?.has("OpenAction"));
        Ok(())
    }

    #[test_log::test]
    fn test_additional_actions_and_next_chain() -> PdfResult<()> {
        let mut doc = Document::new();
        let uri = doc.add_object(dictionary! { "S" => "URI", "URI" => Object::string_literal("http://x") });
        let annot = link(
            &mut doc,
            dictionary! {
                "S" => "GoTo",
                "D" => vec![Object::Integer(0), Object::name("Fit")],
                "Next" => vec![Object::Reference(uri), dictionary! { "S" => "Launch" }.into()],
            },
        )?;
        doc.get_dictionary_mut(annot)?.set(
            "AA",
            dictionary! {
                "E" => dictionary! { "S" => "JavaScript", "JS" => Object::string_literal("x();") },
                "X" => dictionary! { "S" => "GoTo" },
            },
        );

        let policy = SanitizePolicy {
            javascript: true,
            uri: true,
            ..SanitizePolicy::none()
        };
        let report = sanitize(&mut doc, &policy, &Context::default())?;
        assert_eq!(report.removed(ActionKind::Uri), 1);
        assert_eq!(report.removed(ActionKind::JavaScript), 1);

        let annot = doc.get_dictionary(annot)?;
        let next = annot.get_dict("A").and_then(|a| a.get_array("Next")).map(Vec::len);
        assert_eq!(next, Some(1));
        let triggers = annot.get_dict("AA").map(|aa| aa.has("E") || !aa.has("X"));
        assert_eq!(triggers, Some(false));
        Ok(())
    }

    #[test_log::test]
    fn test_rendition_javascript() -> PdfResult<()> {
        let mut doc = Document::new();
        let annot = link(
            &mut doc,
            dictionary! { "S" => "Rendition", "OP" => 0, "JS" => Object::string_literal("play();") },
        )?;
        let policy = SanitizePolicy {
            rendition_js: true,
            ..SanitizePolicy::none()
        };

        let report = sanitize(&mut doc, &policy, &Context::default())?;
        assert_eq!(report.removed(ActionKind::RenditionJs), 1);
        let action = doc.get_dictionary(annot)?.get_dict("A").cloned().unwrap_or_default();
        assert_eq!(action.get_name("S"), Some("Rendition"));
        assert!(!action.has("JS"));
        Ok(())
    }

    #[test_log::test]
    fn test_cancellation_marks_incomplete() -> PdfResult<()> {
        let mut doc = Document::new();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = Context::default().with_cancellation(token);

        let result = sanitize(&mut doc, &SanitizePolicy::all(), &ctx);
        assert!(matches!(result, Err(PdfError::Cancelled)));
        assert_eq!(doc.incomplete(), Some("sanitize"));
        Ok(())
    }

    #[test_log::test]
    fn test_missing_action_is_reported() -> PdfResult<()> {
        let mut doc = Document::new();
        let catalog = doc.catalog_id()?;
        doc.get_dictionary_mut(catalog)?.set("OpenAction", ObjectId::new(999, 0));

        let result = sanitize(&mut doc, &SanitizePolicy { javascript: true, ..SanitizePolicy::none() }, &Context::default());
        match result {
            Err(PdfError::SanitizationFailed { failed }) => assert_eq!(failed, vec![ObjectId::new(999, 0)]),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(doc.incomplete(), Some("sanitize"));
        Ok(())
    }

    #[test_log::test]
    fn test_page_tree_cycle_terminates() -> PdfResult<()> {
        let mut doc = Document::new();
        let page = doc.add_page(b"".to_vec(), None)?;
        let pages = doc.catalog()?.get_reference("Pages").ok_or(PdfError::MissingDictionaryEntry("Pages".into()))?;
        doc.get_dictionary_mut(pages)?
            .set("Kids", vec![Object::Reference(page.id), Object::Reference(pages)]);

        let report = sanitize(&mut doc, &SanitizePolicy::all(), &Context::default())?;
        assert_eq!(report.cycles, vec![pages]);
        Ok(())
    }
}
