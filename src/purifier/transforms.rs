use kuchiki::NodeRef;

use crate::dom;
use crate::rules::{DomAction, DomOperation};

/// Subscriber gating markers on `amp-access` expressions.
const GATED_MARKERS: [&str; 2] = ["NOT", "subscriber"];

/// Reveal AMP content hidden until an access check passes, and drop the
/// elements whose visibility depends on subscription state.
pub fn amp_unhide(document: &NodeRef) {
    for element in dom::select_all(document, "[amp-access-hide]") {
        element.attributes.borrow_mut().remove("amp-access-hide");
    }

    for element in dom::select_all(document, "amp-access-extension, [amp-access]") {
        let gated = dom::attr(&element, "amp-access")
            .is_some_and(|expr| GATED_MARKERS.iter().any(|marker| expr.contains(marker)));
        if gated {
            element.as_node().detach();
        }
    }
}

pub fn apply_dom_operations(document: &NodeRef, operations: &[DomOperation]) {
    for operation in operations {
        match &operation.action {
            DomAction::RemoveElement => {
                dom::remove_all(document, &operation.selector);
            }
            DomAction::RemoveAttribute(name) => {
                for element in dom::select_all(document, &operation.selector) {
                    element.attributes.borrow_mut().remove(name.as_str());
                }
            }
            DomAction::SetAttribute { name, value } => {
                for element in dom::select_all(document, &operation.selector) {
                    element
                        .attributes
                        .borrow_mut()
                        .insert(name.as_str(), value.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amp_unhide() {
        let document = dom::parse(
            r#"<section amp-access="NOT subscriber" id="prompt">Subscribe</section>
               <div amp-access-hide id="body">Full text</div>
               <div amp-access="loggedIn" id="keep">Hi</div>"#,
        );
        amp_unhide(&document);

        assert!(dom::select_first(&document, "#prompt").is_none());
        assert!(dom::select_first(&document, "[amp-access-hide]").is_none());
        assert!(dom::select_first(&document, "#body").is_some());
        assert!(dom::select_first(&document, "#keep").is_some());
    }

    #[test]
    fn test_dom_operations_in_order() {
        let document = dom::parse(
            r#"<div class="meter">Paywall</div><p class="teaser" style="max-height:50px">Text</p>"#,
        );
        let operations = vec![
            DomOperation {
                selector: ".meter".to_string(),
                action: DomAction::RemoveElement,
            },
            DomOperation {
                selector: "p.teaser".to_string(),
                action: DomAction::RemoveAttribute("style".to_string()),
            },
            DomOperation {
                selector: "p.teaser".to_string(),
                action: DomAction::SetAttribute {
                    name: "data-open".to_string(),
                    value: "1".to_string(),
                },
            },
        ];
        apply_dom_operations(&document, &operations);

        assert_eq!(
            dom::body_inner_html(&document),
            r#"<p class="teaser" data-open="1">Text</p>"#
        );
    }
}
