//! Azure configuration builder.
//!
//! Virtual networks and subnets are shared per location; public IPs, network
//! interfaces and virtual machines are created per instance and keyed by a
//! generated hostname. Network interfaces and virtual machines address their
//! dependencies through Azure resource URIs built from the subscription and
//! resource group, so every URI is paired with an embedded graph reference.

use std::rc::Rc;

use camino::Utf8PathBuf;
use serde_json::{Map, Value, json};

use super::{
    BuildContext, BuildError, ConfigBuilder, HostnameSource, ProviderRequirement,
    ensure_provider, file_interpolation,
};
use crate::graph::{ProviderGraph, Resource, ResourceGraph, ResourceRef, sanitize_key};
use crate::spec::{
    AzureAccount, CloudProvider, ImageReference, InstanceSpec, ResourceSpec, SpecError,
    image_definition_value,
};

/// DNS suffix Azure appends to `<label>.<location>` for public IPs.
pub const AZURE_DNS_SUFFIX: &str = "cloudapp.azure.com";

const MAX_HOSTNAME_ATTEMPTS: usize = 8;

/// Normalises an Azure location into its dedup key: lower case with all
/// whitespace removed. `"East US"` and `"eastus "` both become `"eastus"`.
#[must_use]
pub fn normalize_location(location: &str) -> String {
    location
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Network resources addressable by Azure resource URI.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AzureNetworkResource<'a> {
    /// A virtual network.
    VirtualNetwork {
        /// Azure name of the network.
        name: &'a str,
    },
    /// A subnet inside a virtual network.
    Subnet {
        /// Azure name of the parent network.
        virtual_network: &'a str,
        /// Azure name of the subnet.
        name: &'a str,
    },
    /// A public IP address.
    PublicIp {
        /// Azure name of the address.
        name: &'a str,
    },
    /// A network interface.
    NetworkInterface {
        /// Azure name of the interface.
        name: &'a str,
    },
}

/// Builds `azurerm` provider blocks and the per-location and per-instance
/// resource chain for Linux virtual machines.
#[derive(Clone)]
pub struct AzureConfigBuilder {
    instances: Vec<InstanceSpec>,
    account: AzureAccount,
    ssh_public_key_file: Utf8PathBuf,
    hostnames: Rc<dyn HostnameSource>,
}

struct Placement {
    location: String,
    provider: String,
    virtual_network_name: String,
    subnet_name: String,
}

impl AzureConfigBuilder {
    /// Provider plugin name.
    pub const PLUGIN: &'static str = "azurerm";
    /// Registry source of the provider plugin.
    pub const PLUGIN_SOURCE: &'static str = "hashicorp/azurerm";
    /// Provider plugin version constraint.
    pub const PLUGIN_VERSION: &'static str = "~> 3.0.2";
    /// Prefix applied to Azure resource names.
    pub const RESOURCE_PREFIX: &'static str = "cloudimgval";
    /// VM size used when an instance does not request one.
    pub const DEFAULT_VM_SIZE: &'static str = "Standard_DS1_v2";
    /// Admin user created when an instance does not name one.
    pub const DEFAULT_ADMIN_USERNAME: &'static str = "azure";
    /// Address space of each per-location virtual network.
    pub const ADDRESS_SPACE: &'static str = "10.0.0.0/16";
    /// Address prefix of each per-location subnet.
    pub const SUBNET_PREFIX: &'static str = "10.0.2.0/24";
    /// Terraform type of virtual networks.
    pub const VIRTUAL_NETWORK: &'static str = "azurerm_virtual_network";
    /// Terraform type of subnets.
    pub const SUBNET: &'static str = "azurerm_subnet";
    /// Terraform type of public IP addresses.
    pub const PUBLIC_IP: &'static str = "azurerm_public_ip";
    /// Terraform type of network interfaces.
    pub const NETWORK_INTERFACE: &'static str = "azurerm_network_interface";
    /// Terraform type of Linux virtual machines.
    pub const VIRTUAL_MACHINE: &'static str = "azurerm_linux_virtual_machine";

    /// Creates a builder for an Azure specification.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ProviderMismatch`] for non-Azure specifications
    /// and [`BuildError::Spec`] when the subscription scope is missing.
    pub fn new(spec: &ResourceSpec, context: &BuildContext) -> Result<Self, BuildError> {
        ensure_provider(CloudProvider::Azure, spec)?;
        let account = spec
            .azure_account()
            .cloned()
            .ok_or(SpecError::MissingAccountField {
                provider: CloudProvider::Azure,
                field: "subscription_id",
            })?;
        Ok(Self {
            instances: spec.instances().to_vec(),
            account,
            ssh_public_key_file: context.ssh_public_key_file().to_path_buf(),
            hostnames: context.hostnames(),
        })
    }

    fn resource_id_base(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers",
            self.account.subscription_id, self.account.resource_group
        )
    }

    /// Azure resource URI of a network resource in the configured resource
    /// group.
    #[must_use]
    pub fn network_resource_uri(&self, resource: AzureNetworkResource<'_>) -> String {
        let base = format!("{}/Microsoft.Network", self.resource_id_base());
        match resource {
            AzureNetworkResource::VirtualNetwork { name } => {
                format!("{base}/virtualNetworks/{name}")
            }
            AzureNetworkResource::Subnet {
                virtual_network,
                name,
            } => format!("{base}/virtualNetworks/{virtual_network}/subnets/{name}"),
            AzureNetworkResource::PublicIp { name } => format!("{base}/publicIPAddresses/{name}"),
            AzureNetworkResource::NetworkInterface { name } => {
                format!("{base}/networkInterfaces/{name}")
            }
        }
    }

    fn next_hostname(&self, graph: &ResourceGraph) -> String {
        let mut hostname = self.hostnames.next_hostname().to_lowercase();
        for _ in 1..MAX_HOSTNAME_ATTEMPTS {
            if graph.get(Self::PUBLIC_IP, &sanitize_key(&hostname)).is_none() {
                break;
            }
            hostname = self.hostnames.next_hostname().to_lowercase();
        }
        hostname
    }

    fn place(
        &self,
        instance: &InstanceSpec,
        providers: &ProviderGraph,
    ) -> Result<Placement, BuildError> {
        let location = normalize_location(&instance.region);
        let provider =
            providers
                .provider_ref(&location)
                .ok_or_else(|| BuildError::MissingProvider {
                    instance: instance.name.clone(),
                    plugin: Self::PLUGIN.to_owned(),
                    region: location.clone(),
                })?;
        Ok(Placement {
            virtual_network_name: format!("{}-{location}-network", Self::RESOURCE_PREFIX),
            subnet_name: format!("{}-{location}-internal", Self::RESOURCE_PREFIX),
            location,
            provider,
        })
    }

    fn new_virtual_network(&self, placement: &Placement) -> Resource {
        Resource::new(Self::VIRTUAL_NETWORK, &placement.location)
            .attribute("provider", placement.provider.as_str())
            .attribute("name", placement.virtual_network_name.as_str())
            .attribute("address_space", json!([Self::ADDRESS_SPACE]))
            .attribute("location", placement.location.as_str())
            .attribute("resource_group_name", self.account.resource_group.as_str())
    }

    fn new_subnet(&self, placement: &Placement, network: &ResourceRef) -> Resource {
        Resource::new(Self::SUBNET, &placement.location)
            .attribute("provider", placement.provider.as_str())
            .attribute("name", placement.subnet_name.as_str())
            .attribute("resource_group_name", self.account.resource_group.as_str())
            .attribute(
                "virtual_network_name",
                placement.virtual_network_name.as_str(),
            )
            .attribute("address_prefixes", json!([Self::SUBNET_PREFIX]))
            .depends_on(network)
    }

    fn new_public_ip(&self, placement: &Placement, hostname: &str, key: &str) -> Resource {
        Resource::new(Self::PUBLIC_IP, key)
            .attribute("provider", placement.provider.as_str())
            .attribute("name", Self::public_ip_name(hostname))
            .attribute("resource_group_name", self.account.resource_group.as_str())
            .attribute("location", placement.location.as_str())
            .attribute("allocation_method", "Static")
            .attribute("domain_name_label", hostname)
    }

    fn new_network_interface(
        &self,
        placement: &Placement,
        hostname: &str,
        key: &str,
        edges: &NetworkEdges,
    ) -> Resource {
        let public_ip_name = Self::public_ip_name(hostname);
        let ip_configuration = json!({
            "name": format!("{}-ip-config", Self::RESOURCE_PREFIX),
            "subnet_id": self.network_resource_uri(AzureNetworkResource::Subnet {
                virtual_network: &placement.virtual_network_name,
                name: &placement.subnet_name,
            }),
            "private_ip_address_allocation": "Dynamic",
            "public_ip_address_id": self.network_resource_uri(AzureNetworkResource::PublicIp {
                name: &public_ip_name,
            }),
        });

        Resource::new(Self::NETWORK_INTERFACE, key)
            .attribute("provider", placement.provider.as_str())
            .attribute("name", Self::network_interface_name(hostname))
            .attribute("location", placement.location.as_str())
            .attribute("resource_group_name", self.account.resource_group.as_str())
            .attribute("ip_configuration", ip_configuration)
            .embeds(&edges.subnet)
            .embeds(&edges.public_ip)
            .depends_on(&edges.network)
            .depends_on(&edges.subnet)
            .depends_on(&edges.public_ip)
    }

    fn new_virtual_machine(
        &self,
        instance: &InstanceSpec,
        placement: &Placement,
        hostname: &str,
        key: &str,
        edges: &NetworkEdges,
        nic: &ResourceRef,
    ) -> Result<Resource, BuildError> {
        let username = instance
            .username()
            .unwrap_or(Self::DEFAULT_ADMIN_USERNAME);
        let size = instance.instance_type().unwrap_or(Self::DEFAULT_VM_SIZE);
        let nic_uri = self.network_resource_uri(AzureNetworkResource::NetworkInterface {
            name: &Self::network_interface_name(hostname),
        });

        let vm = Resource::new(Self::VIRTUAL_MACHINE, key)
            .attribute("provider", placement.provider.as_str())
            .attribute("name", hostname)
            .attribute("location", placement.location.as_str())
            .attribute("admin_username", username)
            .attribute("size", size)
            .attribute("resource_group_name", self.account.resource_group.as_str())
            .attribute("network_interface_ids", json!([nic_uri]))
            .attribute(
                "os_disk",
                json!({ "caching": "ReadWrite", "storage_account_type": "Standard_LRS" }),
            )
            .attribute(
                "admin_ssh_key",
                json!({
                    "username": username,
                    "public_key": file_interpolation(&self.ssh_public_key_file),
                }),
            );

        let vm = match instance.image(CloudProvider::Azure)? {
            ImageReference::AzureUri(uri) => vm.attribute("source_image_id", uri),
            ImageReference::AzureDefinition(definition) => vm.attribute(
                "source_image_reference",
                image_definition_value(&definition),
            ),
            ImageReference::Ami(_) => {
                return Err(SpecError::MissingField {
                    instance: instance.name.clone(),
                    field: "image_uri or image_definition",
                }
                .into());
            }
        };

        Ok(vm
            .embeds(nic)
            .depends_on(&edges.network)
            .depends_on(&edges.subnet)
            .depends_on(nic))
    }

    fn public_ip_name(hostname: &str) -> String {
        format!("{}-{hostname}-public-ip", Self::RESOURCE_PREFIX)
    }

    fn network_interface_name(hostname: &str) -> String {
        format!("{}-{hostname}-nic", Self::RESOURCE_PREFIX)
    }
}

struct NetworkEdges {
    network: ResourceRef,
    subnet: ResourceRef,
    public_ip: ResourceRef,
}

impl ConfigBuilder for AzureConfigBuilder {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Azure
    }

    fn requirement(&self) -> ProviderRequirement {
        ProviderRequirement {
            name: Self::PLUGIN,
            source: Self::PLUGIN_SOURCE,
            version: Self::PLUGIN_VERSION,
        }
    }

    fn build_providers(&self) -> Result<ProviderGraph, BuildError> {
        let mut providers = ProviderGraph::new(Self::PLUGIN);
        for instance in &self.instances {
            let location = normalize_location(&instance.region);
            let mut settings = Map::new();
            settings.insert(
                String::from("subscription_id"),
                Value::from(self.account.subscription_id.as_str()),
            );
            settings.insert(String::from("features"), json!({}));
            settings.insert(String::from("skip_provider_registration"), Value::Bool(true));
            providers.push(&location, settings)?;
        }
        Ok(providers)
    }

    fn build_resources(&self, providers: &ProviderGraph) -> Result<ResourceGraph, BuildError> {
        let mut graph = ResourceGraph::new();
        for instance in &self.instances {
            let placement = self.place(instance, providers)?;

            let network = graph.ensure(Self::VIRTUAL_NETWORK, &placement.location, || {
                self.new_virtual_network(&placement)
            })?;
            let subnet = graph.ensure(Self::SUBNET, &placement.location, || {
                self.new_subnet(&placement, &network)
            })?;

            let hostname = self.next_hostname(&graph);
            let key = sanitize_key(&hostname);
            let public_ip = graph.insert(self.new_public_ip(&placement, &hostname, &key))?;
            let edges = NetworkEdges {
                network,
                subnet,
                public_ip,
            };
            let nic =
                graph.insert(self.new_network_interface(&placement, &hostname, &key, &edges))?;
            graph.insert(self.new_virtual_machine(
                instance, &placement, &hostname, &key, &edges, &nic,
            )?)?;
        }
        Ok(graph)
    }
}

impl std::fmt::Debug for AzureConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureConfigBuilder")
            .field("instances", &self.instances)
            .field("account", &self.account)
            .field("ssh_public_key_file", &self.ssh_public_key_file)
            .finish_non_exhaustive()
    }
}
