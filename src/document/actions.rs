//! Document-level JavaScript actions

use log::debug;

use crate::dictionary;
use crate::error::{PdfError, PdfResult};
use crate::pdf::{Dictionary, Object, ObjectId};
use super::Document;

/// Prefix of the names given to scripts in the JavaScript name tree
pub const JAVASCRIPT_NAME_PREFIX: &str = "EmbeddedJS";

impl Document {
    /// Add a JavaScript action that runs when the document is opened
    ///
    /// The action is registered in the catalog's `/Names /JavaScript` tree
    /// and set as `/OpenAction`. Returns the id of the action object.
    pub fn add_javascript_open_action(&mut self, script: &str) -> PdfResult<ObjectId> {
        let action = self.add_object(dictionary! {
            "Type" => "Action",
            "S" => "JavaScript",
            "JS" => Object::string_literal(script),
        });

        let catalog_id = self.catalog_id()?;
        let names_id = self.javascript_name_tree(catalog_id)?;
        let tree = self.get_dictionary_mut(names_id)?;
        if !matches!(tree.get("Names"), Some(Object::Array(_))) {
            tree.set("Names", Vec::<Object>::new());
        }
        let entries = tree
            .get_mut("Names")
            .and_then(|names| names.as_array_mut().ok())
            .ok_or_else(|| PdfError::MissingDictionaryEntry("Names".to_string()))?;
        let keys: Vec<Vec<u8>> = entries
            .chunks(2)
            .filter_map(|pair| pair[0].as_str().ok().map(<[u8]>::to_vec))
            .collect();
        let name = (1..)
            .map(|n| format!("{}{}", JAVASCRIPT_NAME_PREFIX, n).into_bytes())
            .find(|name| !keys.contains(name))
            .unwrap_or_default();
        // Name tree keys stay in byte order
        let position = entries
            .chunks(2)
            .position(|pair| pair[0].as_str().is_ok_and(|key| key > name.as_slice()))
            .map_or(entries.len() - entries.len() % 2, |index| index * 2);
        entries.insert(position, Object::Reference(action));
        entries.insert(position, Object::string_literal(name));

        self.get_dictionary_mut(catalog_id)?.set("OpenAction", action);
        debug!("Added JavaScript open action {}", action);
        Ok(action)
    }

    /// Id of the JavaScript name tree node, creating the path to it
    fn javascript_name_tree(&mut self, catalog_id: ObjectId) -> PdfResult<ObjectId> {
        let names = self.get_dictionary(catalog_id)?.get("Names").cloned();
        let names_id = match names {
            Some(Object::Reference(id)) => id,
            Some(Object::Dictionary(direct)) => {
                // Promote a direct /Names dictionary so it can be edited by id
                let id = self.add_object(direct);
                self.get_dictionary_mut(catalog_id)?.set("Names", id);
                id
            }
            _ => {
                let id = self.add_object(Dictionary::new());
                self.get_dictionary_mut(catalog_id)?.set("Names", id);
                id
            }
        };

        let javascript = self.get_dictionary(names_id)?.get("JavaScript").cloned();
        match javascript {
            Some(Object::Reference(id)) => Ok(id),
            Some(Object::Dictionary(direct)) => {
                let id = self.add_object(direct);
                self.get_dictionary_mut(names_id)?.set("JavaScript", id);
                Ok(id)
            }
            _ => {
                let id = self.add_object(dictionary! { "Names" => Vec::<Object>::new() });
                self.get_dictionary_mut(names_id)?.set("JavaScript", id);
                Ok(id)
            }
        }
    }
}
