//! Resource schema registry.
//!
//! The provider supports a closed set of resource kinds. Each kind has a
//! static [`Schema`] describing its attributes: which are required or
//! optional inputs, which are computed by the provider, which can be changed
//! in place and which force the object to be replaced, and which groups of
//! attributes must be unique across an account.
//!
//! Every kind also has the implicit computed attribute `id`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kind of resource the provider can manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Isolated virtual network
    Network,
    /// Address range inside a network
    Subnet,
    /// Gateway attaching a network to the internet
    InternetGateway,
    /// Routing table of a network
    RouteTable,
    /// Binds a subnet to a route table
    RouteTableAssociation,
    /// Stateful firewall rules
    SecurityGroup,
    /// SSH public key registered with the provider
    KeyPair,
    /// Virtual machine
    Instance,
    /// Static public address
    ElasticIp,
}

impl ResourceKind {
    /// All kinds, in catalog order.
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Network,
        ResourceKind::Subnet,
        ResourceKind::InternetGateway,
        ResourceKind::RouteTable,
        ResourceKind::RouteTableAssociation,
        ResourceKind::SecurityGroup,
        ResourceKind::KeyPair,
        ResourceKind::Instance,
        ResourceKind::ElasticIp,
    ];

    /// Name used in declarations and addresses.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet_gateway",
            ResourceKind::RouteTable => "route_table",
            ResourceKind::RouteTableAssociation => "route_table_association",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::KeyPair => "key_pair",
            ResourceKind::Instance => "instance",
            ResourceKind::ElasticIp => "elastic_ip",
        }
    }

    /// Prefix of provider-assigned ids for this kind.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Network => "net",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "igw",
            ResourceKind::RouteTable => "rtb",
            ResourceKind::RouteTableAssociation => "rtbassoc",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::KeyPair => "key",
            ResourceKind::Instance => "i",
            ResourceKind::ElasticIp => "eipalloc",
        }
    }

    /// The schema of this kind.
    pub fn schema(&self) -> &'static Schema {
        match self {
            ResourceKind::Network => &NETWORK,
            ResourceKind::Subnet => &SUBNET,
            ResourceKind::InternetGateway => &INTERNET_GATEWAY,
            ResourceKind::RouteTable => &ROUTE_TABLE,
            ResourceKind::RouteTableAssociation => &ROUTE_TABLE_ASSOCIATION,
            ResourceKind::SecurityGroup => &SECURITY_GROUP,
            ResourceKind::KeyPair => &KEY_PAIR,
            ResourceKind::Instance => &INSTANCE,
            ResourceKind::ElasticIp => &ELASTIC_IP,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Value type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    String,
    Number,
    Bool,
    List,
    Map,
}

impl AttrType {
    /// Check whether a JSON value has this type.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            AttrType::String => value.is_string(),
            AttrType::Number => value.is_number(),
            AttrType::Bool => value.is_boolean(),
            AttrType::List => value.is_array(),
            AttrType::Map => value.is_object(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AttrType::String => "string",
            AttrType::Number => "number",
            AttrType::Bool => "bool",
            AttrType::List => "list",
            AttrType::Map => "map",
        }
    }
}

/// Whether an attribute is set by the user or by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
    Computed,
}

/// Description of a single attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub ty: AttrType,
    pub presence: Presence,
    /// Changing this attribute requires destroying and recreating the object
    pub force_new: bool,
}

impl AttributeSpec {
    const fn required(name: &'static str, ty: AttrType) -> Self {
        Self {
            name,
            ty,
            presence: Presence::Required,
            force_new: false,
        }
    }

    const fn optional(name: &'static str, ty: AttrType) -> Self {
        Self {
            name,
            ty,
            presence: Presence::Optional,
            force_new: false,
        }
    }

    const fn computed(name: &'static str) -> Self {
        Self {
            name,
            ty: AttrType::String,
            presence: Presence::Computed,
            force_new: false,
        }
    }

    const fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Whether the user may set this attribute.
    pub fn is_input(&self) -> bool {
        !matches!(self.presence, Presence::Computed)
    }
}

const ID: AttributeSpec = AttributeSpec::computed("id");

/// Schema of one resource kind.
#[derive(Debug)]
pub struct Schema {
    pub kind: ResourceKind,
    pub attributes: &'static [AttributeSpec],
    /// Attribute groups whose combined value must be unique per account
    pub unique: &'static [&'static [&'static str]],
}

impl Schema {
    /// Look up an attribute, including the implicit `id`.
    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        if name == "id" {
            return Some(&ID);
        }
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Attributes the user may set.
    pub fn inputs(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.iter().filter(|a| a.is_input())
    }

    /// Attributes the user must set.
    pub fn required(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes
            .iter()
            .filter(|a| a.presence == Presence::Required)
    }

    /// Attributes computed by the provider, excluding `id`.
    pub fn computed(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes
            .iter()
            .filter(|a| a.presence == Presence::Computed)
    }

    /// Whether changing the given attribute forces replacement.
    pub fn forces_replacement(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(|a| a.force_new)
    }
}

use AttrType::{Bool, List, Map, String as Str};

static NETWORK: Schema = Schema {
    kind: ResourceKind::Network,
    attributes: &[
        AttributeSpec::required("cidr_block", Str).force_new(),
        AttributeSpec::optional("enable_dns_hostnames", Bool),
        AttributeSpec::optional("tags", Map),
        AttributeSpec::computed("arn"),
    ],
    unique: &[],
};

static SUBNET: Schema = Schema {
    kind: ResourceKind::Subnet,
    attributes: &[
        AttributeSpec::required("network_id", Str).force_new(),
        AttributeSpec::required("cidr_block", Str).force_new(),
        AttributeSpec::optional("availability_zone", Str).force_new(),
        AttributeSpec::optional("map_public_ip", Bool),
        AttributeSpec::optional("tags", Map),
        AttributeSpec::computed("arn"),
    ],
    unique: &[&["network_id", "cidr_block"]],
};

static INTERNET_GATEWAY: Schema = Schema {
    kind: ResourceKind::InternetGateway,
    attributes: &[
        AttributeSpec::required("network_id", Str).force_new(),
        AttributeSpec::optional("tags", Map),
        AttributeSpec::computed("arn"),
    ],
    unique: &[&["network_id"]],
};

static ROUTE_TABLE: Schema = Schema {
    kind: ResourceKind::RouteTable,
    attributes: &[
        AttributeSpec::required("network_id", Str).force_new(),
        AttributeSpec::optional("routes", List),
        AttributeSpec::optional("tags", Map),
        AttributeSpec::computed("arn"),
    ],
    unique: &[],
};

static ROUTE_TABLE_ASSOCIATION: Schema = Schema {
    kind: ResourceKind::RouteTableAssociation,
    attributes: &[
        AttributeSpec::required("subnet_id", Str).force_new(),
        AttributeSpec::required("route_table_id", Str),
    ],
    unique: &[&["subnet_id"]],
};

static SECURITY_GROUP: Schema = Schema {
    kind: ResourceKind::SecurityGroup,
    attributes: &[
        AttributeSpec::required("name", Str).force_new(),
        AttributeSpec::required("network_id", Str).force_new(),
        AttributeSpec::optional("description", Str).force_new(),
        AttributeSpec::optional("ingress", List),
        AttributeSpec::optional("egress", List),
        AttributeSpec::optional("tags", Map),
        AttributeSpec::computed("arn"),
    ],
    unique: &[&["network_id", "name"]],
};

static KEY_PAIR: Schema = Schema {
    kind: ResourceKind::KeyPair,
    attributes: &[
        AttributeSpec::required("key_name", Str).force_new(),
        AttributeSpec::required("public_key", Str).force_new(),
        AttributeSpec::computed("fingerprint"),
    ],
    unique: &[&["key_name"]],
};

static INSTANCE: Schema = Schema {
    kind: ResourceKind::Instance,
    attributes: &[
        AttributeSpec::required("image", Str).force_new(),
        AttributeSpec::required("instance_type", Str),
        AttributeSpec::required("subnet_id", Str).force_new(),
        AttributeSpec::optional("security_group_ids", List),
        AttributeSpec::optional("key_name", Str).force_new(),
        AttributeSpec::optional("user_data", Str).force_new(),
        AttributeSpec::optional("associate_public_ip", Bool).force_new(),
        AttributeSpec::optional("tags", Map),
        AttributeSpec::computed("arn"),
        AttributeSpec::computed("private_ip"),
        AttributeSpec::computed("public_ip"),
        AttributeSpec::computed("public_dns"),
    ],
    unique: &[],
};

static ELASTIC_IP: Schema = Schema {
    kind: ResourceKind::ElasticIp,
    attributes: &[
        AttributeSpec::optional("instance_id", Str),
        AttributeSpec::optional("tags", Map),
        AttributeSpec::computed("public_ip"),
    ],
    unique: &[],
};
