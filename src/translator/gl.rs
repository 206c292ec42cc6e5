//! OpenGL and OpenGL ES: resources keep their global declarations, only bindings are assigned.

use std::any::Any;

use log::trace;

use crate::ast::{AttribQualifier, NodeKind, ProgramAst, StorageQualifier};

use super::{rename_buffer_inner_data, TargetStrategy, TranslateContext};

/// Next free binding of each resource category.
#[derive(Debug, Default, Clone, Copy)]
struct Bindings {
    texture_unit: u32,
    buffer: u32,
    image: u32,
}

#[derive(Debug, Default)]
pub struct GlTarget;

impl GlTarget {
    fn assign_bindings(&self, ast: &mut ProgramAst) {
        let mut b = Bindings::default();
        for node in ast.root.iter_mut() {
            match &mut node.kind {
                NodeKind::VariableDefinitions(vd) => {
                    let binding = match vd.storage {
                        StorageQualifier::Uniform if vd.ty.is_sampler() => {
                            b.texture_unit += 1;
                            b.texture_unit - 1
                        }
                        StorageQualifier::Uniform if vd.ty.is_subpass_input() => {
                            // read back through a plain sampler
                            vd.attributes.values.remove(&AttribQualifier::Color);
                            vd.attributes.values.remove(&AttribQualifier::Depth);
                            b.texture_unit += 1;
                            b.texture_unit - 1
                        }
                        StorageQualifier::Buffer => {
                            b.buffer += 1;
                            b.buffer - 1
                        }
                        _ => continue,
                    };
                    vd.attributes.values.insert(AttribQualifier::Binding, binding);
                }
                NodeKind::ImageDefinition(img) => {
                    img.attributes
                        .values
                        .insert(AttribQualifier::Binding, b.image);
                    b.image += 1;
                }
                _ => {}
            }
        }
        trace!(
            "gl bindings: {} texture units, {} buffers, {} images",
            b.texture_unit,
            b.buffer,
            b.image
        );
    }
}

impl TargetStrategy for GlTarget {
    fn translate(&mut self, ast: &mut ProgramAst, _cx: &mut TranslateContext) -> bool {
        rename_buffer_inner_data(ast);
        self.assign_bindings(ast);
        true
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
