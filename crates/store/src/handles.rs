//! Collection bindings for the domain entities, and the [`Stores`] bundle
//! every stage receives.

use cw_domain::model::{
    Article, Claim, DocId, Followup, LocaleSubscription, Roundup, RunLog, Update,
};
use cw_domain::Result;

use crate::collection::{Collection, Doc, FileStore};

macro_rules! bind_collection {
    ($ty:ty, $name:literal) => {
        impl Doc for $ty {
            const COLLECTION: &'static str = $name;

            fn id(&self) -> &DocId {
                &self.id
            }

            fn id_mut(&mut self) -> &mut DocId {
                &mut self.id
            }
        }
    };
}

bind_collection!(Article, "articles");
bind_collection!(Claim, "claims");
bind_collection!(Update, "updates");
bind_collection!(Followup, "follow_ups");
bind_collection!(Roundup, "roundups");
bind_collection!(LocaleSubscription, "locale_subscriptions");
bind_collection!(RunLog, "logs");

/// Typed handles to every collection the pipeline touches.
#[derive(Clone)]
pub struct Stores {
    pub articles: Collection<Article>,
    pub claims: Collection<Claim>,
    pub updates: Collection<Update>,
    pub follow_ups: Collection<Followup>,
    pub roundups: Collection<Roundup>,
    pub locale_subscriptions: Collection<LocaleSubscription>,
    pub logs: Collection<RunLog>,
}

impl Stores {
    pub fn open(root: impl Into<std::path::PathBuf>) -> Result<Stores> {
        let store = FileStore::open(root)?;
        Ok(Stores {
            articles: store.collection(),
            claims: store.collection(),
            updates: store.collection(),
            follow_ups: store.collection(),
            roundups: store.collection(),
            locale_subscriptions: store.collection(),
            logs: store.collection(),
        })
    }
}
