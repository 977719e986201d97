//! Pipeline component roles, registry and replaceable components
//!
//! Downstream processing is a chain of version-tagged components. The
//! version detector looks optional components up by role and, when the
//! committed version disagrees with an installed component, swaps in the
//! counterpart in place — the replacement keeps the component's position
//! in the chain, so everything upstream and downstream is unaffected.

use tracing::debug;

use crate::core::chars::XmlVersion;

/// The named slots a processing pipeline can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentRole {
    DocumentScanner,
    DtdScanner,
    DtdValidator,
    DtdContentModel,
    NamespaceBinder,
}

/// One lexical event flowing through the pipeline
///
/// Events borrow the scanner's buffers; components that need the text
/// beyond the callback must copy it.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent<'a> {
    StartDocument,
    XmlDecl {
        version: Option<&'a str>,
        encoding: Option<&'a str>,
        standalone: Option<bool>,
    },
    Doctype {
        name: &'a str,
        external_id: Option<&'a str>,
        internal_subset: Option<&'a str>,
    },
    Comment(&'a str),
    ProcessingInstruction {
        target: &'a str,
        data: &'a str,
    },
    Characters(&'a str),
    CData(&'a str),
    /// An unresolved general entity reference in content
    EntityRef(&'a str),
    StartTag {
        name: &'a str,
        /// Everything between the name and `>`, unparsed
        raw_attrs: &'a str,
        empty: bool,
    },
    EndTag {
        name: &'a str,
    },
    EndDocument,
}

/// Receiver for the document's lexical event stream
pub trait DocumentSink {
    fn event(&mut self, event: &DocumentEvent<'_>);
}

/// A version-tagged component installed in the processing chain
pub trait PipelineComponent {
    fn role(&self) -> ComponentRole;
    fn version(&self) -> XmlVersion;
    /// Restore a cached instance to its initial state before reuse
    fn reset(&mut self);
    /// Observe one event on its way downstream
    fn event(&mut self, _event: &DocumentEvent<'_>) {}
}

/// Ordered chain of installed components, addressable by role
///
/// `replace` swaps a component without moving it, which is what keeps the
/// version switch invisible to the rest of the chain.
#[derive(Default)]
pub struct ComponentRegistry {
    chain: Vec<Box<dyn PipelineComponent>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        ComponentRegistry { chain: Vec::new() }
    }

    /// Append a component to the chain
    ///
    /// A component already holding the role is replaced in place instead.
    pub fn install(&mut self, component: Box<dyn PipelineComponent>) {
        let role = component.role();
        match self.chain.iter().position(|c| c.role() == role) {
            Some(i) => self.chain[i] = component,
            None => self.chain.push(component),
        }
    }

    /// Look up an installed component by role
    pub fn get(&self, role: ComponentRole) -> Option<&dyn PipelineComponent> {
        self.chain
            .iter()
            .find(|c| c.role() == role)
            .map(|c| c.as_ref())
    }

    /// Swap the component holding `role`, preserving its chain position
    ///
    /// Returns the displaced component, or the argument back if the role
    /// is not installed.
    pub fn replace(
        &mut self,
        role: ComponentRole,
        mut component: Box<dyn PipelineComponent>,
    ) -> Result<Box<dyn PipelineComponent>, Box<dyn PipelineComponent>> {
        match self.chain.iter().position(|c| c.role() == role) {
            Some(i) => {
                debug!(?role, "replacing pipeline component in place");
                std::mem::swap(&mut self.chain[i], &mut component);
                Ok(component)
            }
            None => Err(component),
        }
    }

    /// Roles currently installed, in chain order
    pub fn roles(&self) -> Vec<ComponentRole> {
        self.chain.iter().map(|c| c.role()).collect()
    }

    /// Deliver an event to every component, in chain order
    pub fn broadcast(&mut self, event: &DocumentEvent<'_>) {
        for component in &mut self.chain {
            component.event(event);
        }
    }

    /// Reset every installed component for a new parse
    pub fn reset_all(&mut self) {
        for component in &mut self.chain {
            component.reset();
        }
    }
}

macro_rules! passthrough_component {
    ($(#[$doc:meta])* $name:ident, $role:expr) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            version: XmlVersion,
            events_seen: usize,
        }

        impl $name {
            pub fn new(version: XmlVersion) -> Self {
                $name {
                    version,
                    events_seen: 0,
                }
            }

            /// Number of events observed since the last reset
            pub fn events_seen(&self) -> usize {
                self.events_seen
            }
        }

        impl PipelineComponent for $name {
            fn role(&self) -> ComponentRole {
                $role
            }

            fn version(&self) -> XmlVersion {
                self.version
            }

            fn reset(&mut self) {
                self.events_seen = 0;
            }

            fn event(&mut self, _event: &DocumentEvent<'_>) {
                self.events_seen += 1;
            }
        }
    };
}

passthrough_component!(
    /// DTD validation slot; the validation semantics live downstream
    DtdValidator,
    ComponentRole::DtdValidator
);
passthrough_component!(
    /// DTD content-model processing slot
    ContentModelProcessor,
    ComponentRole::DtdContentModel
);
passthrough_component!(
    /// Namespace binding slot
    NamespaceBinder,
    ComponentRole::NamespaceBinder
);

/// Construct the stock component for an optional role at a version
pub fn standard_component(
    role: ComponentRole,
    version: XmlVersion,
) -> Option<Box<dyn PipelineComponent>> {
    match role {
        ComponentRole::DtdValidator => Some(Box::new(DtdValidator::new(version))),
        ComponentRole::DtdContentModel => Some(Box::new(ContentModelProcessor::new(version))),
        ComponentRole::NamespaceBinder => Some(Box::new(NamespaceBinder::new(version))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_get() {
        let mut registry = ComponentRegistry::new();
        registry.install(Box::new(NamespaceBinder::new(XmlVersion::V1_0)));
        let binder = registry.get(ComponentRole::NamespaceBinder).unwrap();
        assert_eq!(binder.version(), XmlVersion::V1_0);
        assert!(registry.get(ComponentRole::DtdValidator).is_none());
    }

    #[test]
    fn test_install_same_role_twice_keeps_one() {
        let mut registry = ComponentRegistry::new();
        registry.install(Box::new(NamespaceBinder::new(XmlVersion::V1_0)));
        registry.install(Box::new(NamespaceBinder::new(XmlVersion::V1_1)));
        assert_eq!(registry.roles().len(), 1);
        let binder = registry.get(ComponentRole::NamespaceBinder).unwrap();
        assert_eq!(binder.version(), XmlVersion::V1_1);
    }

    #[test]
    fn test_replace_preserves_chain_position() {
        let mut registry = ComponentRegistry::new();
        registry.install(Box::new(DtdValidator::new(XmlVersion::V1_0)));
        registry.install(Box::new(NamespaceBinder::new(XmlVersion::V1_0)));
        registry.install(Box::new(ContentModelProcessor::new(XmlVersion::V1_0)));

        let old = registry
            .replace(
                ComponentRole::NamespaceBinder,
                Box::new(NamespaceBinder::new(XmlVersion::V1_1)),
            )
            .ok()
            .unwrap();
        assert_eq!(old.version(), XmlVersion::V1_0);
        assert_eq!(
            registry.roles(),
            vec![
                ComponentRole::DtdValidator,
                ComponentRole::NamespaceBinder,
                ComponentRole::DtdContentModel,
            ]
        );
        let binder = registry.get(ComponentRole::NamespaceBinder).unwrap();
        assert_eq!(binder.version(), XmlVersion::V1_1);
    }

    #[test]
    fn test_replace_unknown_role_returns_component() {
        let mut registry = ComponentRegistry::new();
        let result = registry.replace(
            ComponentRole::DtdValidator,
            Box::new(DtdValidator::new(XmlVersion::V1_1)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_components_observe_events_and_reset() {
        let mut binder = NamespaceBinder::new(XmlVersion::V1_0);
        binder.event(&DocumentEvent::StartDocument);
        binder.event(&DocumentEvent::Characters("x"));
        assert_eq!(binder.events_seen(), 2);
        binder.reset();
        assert_eq!(binder.events_seen(), 0);
    }

    #[test]
    fn test_broadcast_reaches_all_components() {
        let mut registry = ComponentRegistry::new();
        registry.install(Box::new(DtdValidator::new(XmlVersion::V1_0)));
        registry.install(Box::new(NamespaceBinder::new(XmlVersion::V1_0)));
        registry.broadcast(&DocumentEvent::StartDocument);
        registry.broadcast(&DocumentEvent::Characters("x"));
        assert_eq!(registry.roles().len(), 2);
    }

    #[test]
    fn test_standard_component_factory() {
        let comp = standard_component(ComponentRole::DtdValidator, XmlVersion::V1_1).unwrap();
        assert_eq!(comp.role(), ComponentRole::DtdValidator);
        assert_eq!(comp.version(), XmlVersion::V1_1);
        assert!(standard_component(ComponentRole::DocumentScanner, XmlVersion::V1_0).is_none());
    }
}
